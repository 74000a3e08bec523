use thiserror::Error;

use crate::commands::CommandKind;

#[derive(Debug, Error)]
pub enum DryerError {
    /// The request would heat nothing, or is otherwise unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("missing command template: {0}")]
    MissingTemplate(CommandKind),

    #[error("invalid command template for {kind}: {reason}")]
    Template { kind: CommandKind, reason: String },

    /// Loosely typed input that could not be coerced into a preset.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Script text the output encoding cannot represent.
    #[error("{encoding} cannot encode {text:?}")]
    Encoding { encoding: &'static str, text: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DryerError>;
