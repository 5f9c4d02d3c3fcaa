//! Failure taxonomy at the channel boundary.
//!
//! Everything below a channel reports plain `anyhow` errors with context.
//! The channel sorts them into the kinds below before logging them and
//! handing them to the control surface; none of them stop the pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::data::model::FileKind;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Remote command, download or upload failed.  Retried on the next change.
    #[error("transfer failed for {path}: {cause:#}")]
    Transfer { path: String, cause: anyhow::Error },

    /// The extension is not one we can decode.
    #[error("unsupported file type: {path}")]
    Unsupported { path: String },

    /// The listing converter failed or produced nothing.
    #[error("conversion of {path} failed: {cause:#}")]
    Conversion { path: PathBuf, cause: anyhow::Error },

    /// The staged file could not be read as `kind`.
    #[error("could not load {kind} file {path}: {cause:#}")]
    Load {
        kind: FileKind,
        path: PathBuf,
        cause: anyhow::Error,
    },

    /// The channel worker has shut down.
    #[error("channel is closed")]
    Disconnected,
}

impl ChannelError {
    /// Transient I/O failures; everything else is a format problem with the
    /// file itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transfer { .. } | ChannelError::Disconnected)
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
