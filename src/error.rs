//! session error taxonomy
//!
//! Setup problems (bad arguments, missing extensions, unresolvable windows)
//! stay plain anyhow errors with context. Once the event loop runs, failures
//! collapse into these variants so every exit path is explicit.

use thiserror::Error;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::ErrorKind;

/// Fatal conditions of a running mirror session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The source window is gone: destroyed outright, or requests against
    /// its drawables started failing.
    #[error("source window {0:#010x} is gone")]
    SourceLost(u32),

    #[error("display connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("display request failed: {0}")]
    Reply(ReplyError),
}

impl SessionError {
    /// Classify a checked-request failure against the source window. Errors
    /// naming a dead window, drawable or damage object mean the source went
    /// away; anything else is a protocol failure in its own right.
    pub fn from_reply(err: ReplyError, source: u32) -> Self {
        match &err {
            ReplyError::X11Error(x11) => match x11.error_kind {
                ErrorKind::Window
                | ErrorKind::Drawable
                | ErrorKind::Pixmap
                | ErrorKind::Match
                | ErrorKind::DamageBadDamage => Self::SourceLost(source),
                _ => Self::Reply(err),
            },
            _ => Self::Reply(err),
        }
    }
}
