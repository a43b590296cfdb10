use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed catalog of individually purchasable features. Gated routes and
/// one-off checkouts may only reference keys from this set; anything else is
/// a caller error, not a new feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKey {
    ResumeAnalysis,
    CareerRoadmap,
    JobMatching,
    MicroProjects,
    InterviewPrep,
    SalaryNegotiator,
}

pub const FEATURE_CATALOG: [FeatureKey; 6] = [
    FeatureKey::ResumeAnalysis,
    FeatureKey::CareerRoadmap,
    FeatureKey::JobMatching,
    FeatureKey::MicroProjects,
    FeatureKey::InterviewPrep,
    FeatureKey::SalaryNegotiator,
];

impl FeatureKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeAnalysis => "resume_analysis",
            Self::CareerRoadmap => "career_roadmap",
            Self::JobMatching => "job_matching",
            Self::MicroProjects => "micro_projects",
            Self::InterviewPrep => "interview_prep",
            Self::SalaryNegotiator => "salary_negotiator",
        }
    }

    /// One-off purchase price in cents, used for payment-mode checkouts.
    pub fn price_cents(&self) -> u32 {
        match self {
            Self::ResumeAnalysis => 900,
            Self::CareerRoadmap => 1900,
            Self::JobMatching => 900,
            Self::MicroProjects => 1400,
            Self::InterviewPrep => 1400,
            Self::SalaryNegotiator => 1900,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ResumeAnalysis => "Resume Analysis",
            Self::CareerRoadmap => "Career Roadmap",
            Self::JobMatching => "Job Matching",
            Self::MicroProjects => "Micro-Projects",
            Self::InterviewPrep => "Interview Prep",
            Self::SalaryNegotiator => "Salary Negotiator",
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFeatureKey(pub String);

impl fmt::Display for UnknownFeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown feature key '{}'", self.0)
    }
}

impl FromStr for FeatureKey {
    type Err = UnknownFeatureKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FEATURE_CATALOG
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownFeatureKey(s.to_string()))
    }
}
