pub mod auth;
pub mod internal_key;
pub mod rate_limit;
