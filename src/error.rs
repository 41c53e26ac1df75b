//! Failure types for OS-facing effects.
//!
//! Everything else in the crate propagates `anyhow::Error`; effect calls get a
//! typed error because callers treat "refused" and "not permitted" differently
//! from a broken platform.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EffectError {
    /// The platform refused the effect for this app (protected process,
    /// nothing running, permission denied for that target).
    #[error("platform refused {effect} for {app}: {reason}")]
    Denied {
        effect: &'static str,
        app: String,
        reason: String,
    },

    /// Suspension requires elevated authority that has not been granted.
    #[error("elevated authority not held; cannot {effect}")]
    AuthorityMissing { effect: &'static str },

    /// The effect is not wired up on this platform.
    #[error("{effect} is not supported on this platform")]
    Unsupported { effect: &'static str },

    /// The effect thread is gone or the effect command itself failed.
    #[error("{effect} failed: {message}")]
    Failed {
        effect: &'static str,
        message: String,
    },
}

impl EffectError {
    pub fn denied(effect: &'static str, app: &str, reason: impl Into<String>) -> Self {
        Self::Denied {
            effect,
            app: app.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(effect: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            effect,
            message: message.into(),
        }
    }

    /// Denials and missing authority are expected outcomes, not faults.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Denied { .. } | Self::AuthorityMissing { .. })
    }
}

pub type EffectResult<T> = Result<T, EffectError>;
