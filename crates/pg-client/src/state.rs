//! Session lifecycle state.
//!
//! ```text
//! Open -> Terminating -> Closing -> Closed   (shutdown)
//! Open -> Closing -> Closed                  (kill, or shutdown of an
//!                                             inactive channel)
//! ```
//!
//! `Terminating` lasts until the Terminate write settles, whatever its
//! outcome. The pool reference is released on entering `Closing`, so a slow
//! channel close never delays pool reclamation.

use std::fmt;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Requests can be submitted.
    #[default]
    Open,
    /// Terminate is being written.
    Terminating,
    /// The pool reference is released and the channel is closing.
    Closing,
    /// The channel is closed.
    Closed,
}

impl SessionState {
    /// Whether the session still accepts requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether shutdown has begun or finished.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        !self.is_open()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Terminating => "terminating",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}
