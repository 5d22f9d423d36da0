//! Failure taxonomy for the session engine.
//!
//! Almost every failure here is soft: the worker logs it and carries on with
//! prior state intact. The variants exist so call sites can log the right
//! thing, not so callers can crash.

/// Failures raised while folding an inbound event into session state.
#[derive(Debug, thiserror::Error)]
pub enum FusionError {
    /// The payload could not be decoded (bad base64, unreadable image, ...).
    #[error("malformed payload: {0}")]
    Decode(String),

    /// An OCR or transcription call failed or timed out.
    #[error("collaborator call failed: {0:#}")]
    Collaborator(anyhow::Error),
}
