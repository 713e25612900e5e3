pub mod auth;
pub mod notification;
pub mod phone_verification;
pub mod preference;
pub mod user;
