//! Error taxonomy for the matching core.
//!
//! Malformed markup and empty results never surface here: the codec degrades
//! to plain text and "no match" is `None`. What remains are caller bugs
//! (contract violations), backend outages, and archive/I/O failures.

use thiserror::Error;

use crate::models::LangPair;

/// Errors raised by the core components.
#[derive(Debug, Error)]
pub enum TmError {
    /// No tokenizer is registered for the requested language.
    #[error("no tokenizer registered for language '{lang}'")]
    NoTokenizer { lang: String },

    /// More tag placeholders were found than tags were supplied.
    #[error("tag placeholder #{needed} has no matching tag ({supplied} supplied)")]
    TagPlaceholderExhausted { needed: usize, supplied: usize },

    /// The candidate retrieval backend failed. Distinct from "zero candidates".
    #[error("{operation} failed for {lang_pair}: {message}")]
    Retrieval {
        operation: &'static str,
        lang_pair: LangPair,
        message: String,
    },

    /// An archive could not be opened or one of its members cannot be read.
    #[error("archive {path}: {message}")]
    Archive { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TmError {
    pub fn retrieval(
        operation: &'static str,
        lang_pair: &LangPair,
        message: impl std::fmt::Display,
    ) -> Self {
        TmError::Retrieval {
            operation,
            lang_pair: lang_pair.clone(),
            message: message.to_string(),
        }
    }

    pub fn archive(path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TmError::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for TmError {
    fn from(e: zip::result::ZipError) -> Self {
        TmError::archive("<stream>", e)
    }
}

/// Result alias for core operations.
pub type TmResult<T> = Result<T, TmError>;
