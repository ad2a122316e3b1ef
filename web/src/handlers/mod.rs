//! HTTP request handlers.

pub mod auth;
pub mod health;

pub use auth::{begin_auth, complete_auth};
pub use health::health_check;
