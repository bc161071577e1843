//! Error conditions reported to the operator
//!
//! None of these are fatal: every command that fails leaves the engine state
//! exactly as it was before the command ran.

use thiserror::Error;

/// Domain error for engine commands
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MapperError {
    /// The command is not allowed in the current state (deleting the last
    /// surface, acting with no active surface, unknown ids or presets).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Media could not be classified, decoded, or opened.
    #[error("media load failure: {0}")]
    MediaLoadFailure(String),

    /// A project document failed to parse or had the wrong shape.
    #[error("invalid project file: {0}")]
    InvalidProjectFile(String),
}

impl MapperError {
    pub fn invalid_op(msg: impl Into<String>) -> Self {
        MapperError::InvalidOperation(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        MapperError::MediaLoadFailure(msg.into())
    }

    pub fn project(msg: impl Into<String>) -> Self {
        MapperError::InvalidProjectFile(msg.into())
    }

    /// Short machine-readable kind used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            MapperError::InvalidOperation(_) => "InvalidOperation",
            MapperError::MediaLoadFailure(_) => "MediaLoadFailure",
            MapperError::InvalidProjectFile(_) => "InvalidProjectFile",
        }
    }
}

pub type MapperResult<T> = std::result::Result<T, MapperError>;
