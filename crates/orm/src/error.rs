//! Errors

use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, Error>;

/// Mapping engine error.
///
/// Configuration and identity errors abort the enclosing call. A
/// [`Error::Conflict`] is the one recoverable kind: callers re-fetch and
/// retry. The caller's transaction is never rolled back by the engine.
#[derive(Error, Debug)]
pub enum Error {
    // --- Configuration ---
    /// The rule tree is invalid or incomplete.
    #[error("invalid rule '{path}': {reason}")]
    Config {
        /// Path of the offending rule; empty for the root.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    // --- Identity ---
    /// A write was attempted with no open transaction.
    #[error("write operations require an open transaction")]
    NoTransaction,

    /// The persisted graph targeted by an update does not exist.
    #[error("no persisted record matches the update target")]
    NotFound,

    /// More than one persisted graph matches the update target.
    #[error("{count} persisted records match the update target")]
    Ambiguous {
        /// Number of roots the key query returned.
        count: usize,
    },

    /// The persisted root is not the root being saved.
    #[error("persisted root '{current}' does not match '{desired}'")]
    IdentityMismatch {
        /// Identity of the root the key query returned.
        current: String,
        /// Identity of the root being saved.
        desired: String,
    },

    // --- Concurrency ---
    /// An update or delete matched no row: the row was changed or removed
    /// since it was read.
    #[error("concurrency conflict writing '{table}' row {identity}")]
    Conflict {
        /// Table of the row that was not written.
        table: String,
        /// Identity of that row.
        identity: String,
    },

    // --- Relations ---
    /// A relation-id column needs an identifier that was never captured.
    #[error("relation id '{column}' at '{path}' has no identifier captured from '{source_path}'")]
    Relation {
        /// Path of the rule whose row needs the identifier.
        path: String,
        /// Relation-id column left unset.
        column: String,
        /// Path of the rule expected to generate the identifier.
        source_path: String,
    },

    /// Data access or conversion failure.
    #[error(transparent)]
    Data(anyhow::Error),
}

impl Error {
    /// Returns `true` for optimistic concurrency conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn config(path: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // errors raised inside a row sink come back wrapped
        match err.downcast::<Self>() {
            Ok(inner) => inner,
            Err(err) => Self::Data(err),
        }
    }
}
