//! veriface-service: request engine around the decision core.
//!
//! Owns one blink tracker per onboarding session, runs every computation on
//! the blocking pool under a request deadline, and converts outcomes into
//! caller-facing [`Response`] values.

pub mod config;
pub mod engine;
pub mod response;

pub use config::Config;
pub use engine::{ServiceError, SessionId, VerificationEngine};
pub use response::Response;
