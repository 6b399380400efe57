//! Channel layer errors.
//!
//! | Error | Code | Retryable |
//! |-------|------|-----------|
//! | [`InvalidKey`](ChannelError::InvalidKey) | `CHANNEL_INVALID_KEY` | No |
//! | [`DuplicateKey`](ChannelError::DuplicateKey) | `CHANNEL_DUPLICATE_KEY` | No |
//! | [`NotFound`](ChannelError::NotFound) | `CHANNEL_NOT_FOUND` | No |
//! | [`Interrupted`](ChannelError::Interrupted) | `CHANNEL_INTERRUPTED` | Yes |
//! | [`Serialization`](ChannelError::Serialization) | `CHANNEL_SERIALIZATION` | No |
//! | [`Deserialization`](ChannelError::Deserialization) | `CHANNEL_DESERIALIZATION` | No |
//! | [`PassByReferenceUnsupported`](ChannelError::PassByReferenceUnsupported) | `CHANNEL_PASS_BY_REFERENCE` | No |
//! | [`Transfer`](ChannelError::Transfer) | `CHANNEL_TRANSFER` | No |
//! | [`InvalidConfig`](ChannelError::InvalidConfig) | `CHANNEL_INVALID_CONFIG` | No |

use thiserror::Error;

use crate::codec::CodecError;
use crate::value::{EnvKind, ValueKind};

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Keys must be strictly positive.
    #[error("invalid channel key {0}: keys must be positive")]
    InvalidKey(i64),

    #[error("a channel with key {0} already exists")]
    DuplicateKey(i64),

    /// Stale, foreign or closed handle, or unknown key.
    #[error("no channel found for {0}")]
    NotFound(String),

    /// A blocking wait was interrupted through the context's interrupt token.
    #[error("{op} was interrupted")]
    Interrupted { op: &'static str },

    #[error("cannot serialize {kind} value: {source}")]
    Serialization {
        kind: ValueKind,
        #[source]
        source: CodecError,
    },

    #[error("cannot deserialize {what}: {source}")]
    Deserialization {
        what: &'static str,
        #[source]
        source: CodecError,
    },

    /// The receiving context has no counterpart for a package or namespace
    /// environment, and environments cannot be passed by reference.
    #[error("{0} cannot be passed by reference")]
    PassByReferenceUnsupported(EnvKind),

    /// Reconstruction produced something that cannot hold the transferred payload.
    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),
}

impl ChannelError {
    pub fn not_found_key(key: i64) -> Self {
        ChannelError::NotFound(format!("key {}", key))
    }

    pub fn not_found_handle(raw: i64) -> Self {
        ChannelError::NotFound(format!("handle {}", raw))
    }

    /// Maps a decode failure, turning unknown named environments into
    /// [`ChannelError::PassByReferenceUnsupported`].
    pub(crate) fn decode(what: &'static str, source: CodecError) -> Self {
        match source {
            CodecError::UnknownEnvironment(kind) => ChannelError::PassByReferenceUnsupported(kind),
            source => ChannelError::Deserialization { what, source },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChannelError::InvalidKey(_) => "CHANNEL_INVALID_KEY",
            ChannelError::DuplicateKey(_) => "CHANNEL_DUPLICATE_KEY",
            ChannelError::NotFound(_) => "CHANNEL_NOT_FOUND",
            ChannelError::Interrupted { .. } => "CHANNEL_INTERRUPTED",
            ChannelError::Serialization { .. } => "CHANNEL_SERIALIZATION",
            ChannelError::Deserialization { .. } => "CHANNEL_DESERIALIZATION",
            ChannelError::PassByReferenceUnsupported(_) => "CHANNEL_PASS_BY_REFERENCE",
            ChannelError::Transfer(_) => "CHANNEL_TRANSFER",
            ChannelError::InvalidConfig(_) => "CHANNEL_INVALID_CONFIG",
        }
    }

    /// Only an interrupted wait may succeed when repeated unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::Interrupted { .. })
    }
}
