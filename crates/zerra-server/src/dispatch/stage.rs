//! Router stages and stage-tagged faults.

use std::fmt;

use super::errors::DispatchError;

/// Position of a request in the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Request accepted by the middleware.
    Idle,
    /// Negotiating the codec, admitting the origin, decoding the envelope.
    ParsingEnvelope,
    /// Authorizing and binding the caller's identity.
    Authorizing,
    /// Resolving the per-type throttle and global admission.
    ResolvingThrottle,
    /// Handler delegate running.
    Invoking,
    /// Writing the response.
    Responding,
}

impl Stage {
    /// Stable name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ParsingEnvelope => "parsing_envelope",
            Self::Authorizing => "authorizing",
            Self::ResolvingThrottle => "resolving_throttle",
            Self::Invoking => "invoking",
            Self::Responding => "responding",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded together with the stage it interrupted.
#[derive(Debug)]
pub struct Fault {
    /// Stage in progress when the failure occurred.
    pub stage: Stage,
    /// The failure itself.
    pub error: DispatchError,
}

impl Fault {
    /// Tags `error` with `stage`.
    pub const fn new(stage: Stage, error: DispatchError) -> Self {
        Self { stage, error }
    }
}
