//! Unified error types for the session map core.

use std::fmt;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Errors arising while decoding a persisted on-disk representation.
///
/// Every variant here is fatal when it surfaces out of [`crate::session_map`]
/// load paths (see spec §7) — there is no recoverable decode error at this
/// layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer ended before the expected number of bytes were read.
    UnexpectedEof { wanted: usize, remaining: usize },
    /// A versioned frame's `struct_v` is older than the decoder supports.
    UnsupportedVersion { struct_v: u8, compat_v: u8 },
    /// An OMAP key did not parse as a well-formed `EntityName`.
    MalformedKey(String),
    /// A decoded `SessionInfo`/header body failed a structural check.
    MalformedValue(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof { wanted, remaining } => write!(
                f,
                "unexpected end of buffer: wanted {wanted} bytes, {remaining} remaining"
            ),
            Self::UnsupportedVersion { struct_v, compat_v } => write!(
                f,
                "decoder does not support struct_v={struct_v} (compat_v={compat_v})"
            ),
            Self::MalformedKey(key) => write!(f, "malformed entity-name key: {key}"),
            Self::MalformedValue(msg) => write!(f, "malformed value: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Opaque failure surfaced by the object-store collaborator (the Objecter).
///
/// The real client library's error type is an external collaborator per the
/// spec's scope (§1); this crate only needs to know that an operation
/// failed and why, for logging purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

impl From<String> for StoreError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StoreError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// MapError — top-level
// ---------------------------------------------------------------------------

/// Top-level error for the session map's load/save state machines.
///
/// Per spec §7, both variants are fatal to the owning rank: callers should
/// log this at `error` level and abort the process rather than attempt to
/// continue with a half-loaded or half-saved map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    Decode(DecodeError),
    Store(StoreError),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
        }
    }
}

impl std::error::Error for MapError {}

impl From<DecodeError> for MapError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<StoreError> for MapError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing the crate's small configuration surface.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}
