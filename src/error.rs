//! # Error Module
//!
//! The single error type shared by the queue family, the checkpoint layer and the
//! task engine.
//!
//! ## Overview
//!
//! `SpiderError` covers three very different situations:
//!
//! - **Crawl failures** raised by a `Spider` (`ClientError`, `Timeout`, anything
//!   wrapped through `GeneralError`). The engine logs these and moves on.
//! - **Resource failures** (`Io`, `Serialization`) raised while spilling or
//!   checkpointing. These propagate to whoever called `put` or `stash`.
//! - **Checkpoint problems** (`NotFound`, `CorruptedState`, `NotRecoverable`)
//!   raised by `recover`. Startup code decides whether to start fresh or abort.
//!
//! Every error maps onto an [`ErrorCategory`], which is what the
//! [`ErrorFormatterRegistry`](crate::formatter::ErrorFormatterRegistry) keys on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("client error for {target}: {message}")]
    ClientError {
        target: String,
        status: Option<u16>,
        message: String,
    },

    #[error("request to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no checkpoint found in {}", .0.display())]
    NotFound(PathBuf),

    #[error("corrupted checkpoint {}: {reason}", .path.display())]
    CorruptedState { path: PathBuf, reason: String },

    #[error("queue {0} does not support stash/recover")]
    NotRecoverable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid target url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("{0}")]
    GeneralError(String),
}

impl SpiderError {
    /// Shorthand for the client-side failure a spider reports for a bad fetch.
    pub fn client(target: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        SpiderError::ClientError {
            target: target.into(),
            status,
            message: message.into(),
        }
    }

    /// Wraps any displayable error as a `GeneralError`.
    pub fn other(err: impl fmt::Display) -> Self {
        SpiderError::GeneralError(err.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SpiderError::ClientError { .. } => ErrorCategory::Client,
            SpiderError::Timeout { .. } => ErrorCategory::Timeout,
            SpiderError::Io(_) => ErrorCategory::Io,
            SpiderError::NotFound(_)
            | SpiderError::CorruptedState { .. }
            | SpiderError::NotRecoverable(_) => ErrorCategory::Checkpoint,
            SpiderError::Serialization(_)
            | SpiderError::UrlParse(_)
            | SpiderError::ConfigurationError(_)
            | SpiderError::GeneralError(_) => ErrorCategory::Other,
        }
    }
}

impl From<rmp_serde::encode::Error> for SpiderError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        SpiderError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SpiderError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        SpiderError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SpiderError {
    fn from(err: serde_json::Error) -> Self {
        SpiderError::Serialization(err.to_string())
    }
}

/// Coarse classification of a [`SpiderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The remote side rejected the request (4xx, bad target, refused connection).
    Client,
    Timeout,
    /// Local disk or file handle failure.
    Io,
    /// Missing, partial or unreadable checkpoint.
    Checkpoint,
    /// Everything else.
    Other,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Client => "client",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Io => "io",
            ErrorCategory::Checkpoint => "checkpoint",
            ErrorCategory::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
