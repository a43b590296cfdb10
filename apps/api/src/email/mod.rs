//! Outbound email via the Resend HTTP API.
//!
//! Notification sends are detached: a provider outage must never fail the
//! request that triggered the notification.

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EmailConfig;

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct EmailClient {
    http: Client,
    config: EmailConfig,
}

impl EmailClient {
    pub fn new(config: EmailConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, config })
    }

    async fn send(&self, to: &str, subject: &str, text: &str) -> anyhow::Result<()> {
        debug!(to, subject, "Sending email");
        let response = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.config.resend_api_key)
            .json(&SendEmailRequest {
                from: &self.config.from_address,
                to: [to],
                subject,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("resend returned {status}: {body}");
        }
        Ok(())
    }

    /// Invitation email, sent without blocking the caller.
    pub fn send_invitation_detached(&self, to: String, institution: String, join_url: String) {
        let client = self.clone();
        tokio::spawn(async move {
            let subject = format!("You're invited to join {institution} on Ascent");
            let text = format!(
                "{institution} has invited you to Ascent.\n\n\
                 Accept the invitation here: {join_url}\n\n\
                 The invitation expires in 7 days."
            );
            if let Err(e) = client.send(&to, &subject, &text).await {
                warn!(%to, "Failed to send invitation email: {e}");
            }
        });
    }

    /// Seat-usage alert to institution admins, sent without blocking.
    pub fn send_seat_alert_detached(&self, to: String, institution: String, used_seats: i32) {
        let client = self.clone();
        tokio::spawn(async move {
            let subject = format!("{institution}: license seats are running low");
            let text = format!(
                "Your institution has now used {used_seats} licensed seats, \
                 which is over 80% of capacity.\n\n\
                 Consider expanding the license before seats run out."
            );
            if let Err(e) = client.send(&to, &subject, &text).await {
                warn!(%to, "Failed to send seat alert email: {e}");
            }
        });
    }
}
