//! Mock implementations for testing.
//!
//! In-memory stand-ins for the provider capability and the clock, for use
//! in unit and integration tests.

pub mod clock;
pub mod provider;

pub use clock::MockClock;
pub use provider::{
    MockFailure, MockProvider, MockSession, MOCK_ACCESS_TOKEN, MOCK_AUTH_URL, MOCK_EMAIL,
    MOCK_NAME, MOCK_NICK_NAME, MOCK_PROVIDER,
};
