//! Error tiers for the agent.
//!
//! Mirrors the three severities every component in this family uses:
//! [`Recoverable`](Error::Recoverable) errors are logged and the event loop
//! continues; [`SessionFatal`](Error::SessionFatal) errors tear down the
//! current connection to the host but allow the process to restart;
//! [`ProcessFatal`](Error::ProcessFatal) errors (REDESIGN FLAG R3's
//! unsupported-depth check among them) are reported and the process exits.

use std::fmt;

/// An error produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single message could not be handled, but the session is still
    /// usable (for example, a reference to an already-destroyed window).
    #[error("recoverable protocol error: {0}")]
    Recoverable(#[source] RecoverableError),

    /// The connection to the host is no longer usable and must be
    /// re-established; see [`vmgui_client::Client::reconnect`].
    #[error("session with the host daemon failed: {0}")]
    SessionFatal(#[source] std::io::Error),

    /// A configuration error that makes correct operation impossible, such
    /// as a pixel depth other than [`vmgui_proto::FRAME_BPP`] (REDESIGN
    /// FLAG R3).  The process must exit.
    #[error("fatal agent configuration error: {0}")]
    ProcessFatal(String),
}

/// A recoverable protocol error: the message in question is dropped, but the
/// session continues.
#[derive(Debug)]
pub enum RecoverableError {
    /// A message referenced a window that does not exist.  Races between
    /// window destruction and in-flight events make this expected, not a
    /// protocol violation.
    UnknownWindow {
        /// The window id that was not found.
        window: u32,
    },
    /// The host sent a message type this agent does not understand.
    UnknownMessageType {
        /// The raw, UNTRUSTED type value.
        ty: u32,
    },
}

impl fmt::Display for RecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverableError::UnknownWindow { window } => {
                write!(f, "no such window: {}", window)
            }
            RecoverableError::UnknownMessageType { ty } => {
                write!(f, "unknown message type: {}", ty)
            }
        }
    }
}

impl std::error::Error for RecoverableError {}
