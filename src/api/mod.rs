//! Processing API client: submission, job history, and clearing.

/// Submission outcomes and the high-level client.
pub mod client;
/// Typed failures shared by every call.
pub mod error;
/// Processing request forms, validation, and filter presets.
pub mod form;
/// Anti-forgery token resolution.
pub mod token;
/// HTTP transport seam.
pub mod transport;

#[cfg(test)]
pub(crate) mod fake;

pub use client::{ApiClient, InlineResult, ResultCard, ResultPayload, SubmitOutcome};
pub use error::ApiError;
