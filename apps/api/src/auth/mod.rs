pub mod gate;
pub mod handlers;
pub mod password;
pub mod session;
