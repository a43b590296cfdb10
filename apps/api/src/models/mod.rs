pub mod feature;
pub mod institution;
pub mod session;
pub mod user;
