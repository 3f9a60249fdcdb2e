use std::fmt::Display;

use serde_json::Value;
use sqlx::error::ErrorKind;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No `{entity}` row with primary key {key}")]
    NotFound { entity: String, key: Value },

    /// The store rejected a write, e.g. because of a unique or foreign key violation.
    #[error("Write to `{table}` was rejected: {source}")]
    Constraint {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to {action} transaction: {source}")]
    Transaction {
        action: TransactionAction,
        #[source]
        source: sqlx::Error,
    },

    /// An entity declaration could not be registered.
    #[error("Invalid definition for entity `{entity}`: {reason}")]
    Definition { entity: String, reason: String },

    #[error("No database URL given, and `DATABASE_URL` is not set")]
    MissingDatabaseUrl,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Wrap an error returned by a write against `table`, classifying integrity violations as
    /// [`Error::Constraint`].
    pub(crate) fn from_write(table: &str, error: sqlx::Error) -> Self {
        let is_constraint = match &error {
            sqlx::Error::Database(e) => {
                !matches!(e.kind(), ErrorKind::Other)
                    // SQLSTATE class 23: integrity constraint violation
                    || e.code().is_some_and(|code| code.starts_with("23"))
            }
            _ => false,
        };

        if is_constraint {
            Self::Constraint {
                table: table.to_string(),
                source: error,
            }
        } else {
            Self::Database(error)
        }
    }

    pub(crate) fn definition(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Definition {
            entity: entity.into(),
            reason: reason.into(),
        }
    }
}

/// A patch, criteria object or eager path that does not fit the registered schema.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("`{entity}` has no attribute or relation named `{key}`")]
    UnknownField { entity: String, key: String },

    #[error("No entity is registered under the name `{0}`")]
    UnknownEntity(String),

    #[error("`{entity}` has no relation named `{relation}` (eager path `{path}`)")]
    UnknownRelation {
        entity: String,
        relation: String,
        path: String,
    },

    #[error("Relation `{entity}.{relation}` expects {expected}")]
    ShapeMismatch {
        entity: String,
        relation: String,
        expected: &'static str,
    },

    #[error("Expected {what} to be a JSON object")]
    NotAnObject { what: &'static str },

    #[error("`{entity}` with primary key {key} is nested inside itself")]
    Cycle { entity: String, key: Value },

    #[error("Patch nesting exceeds the maximum depth of {limit}")]
    DepthExceeded { limit: usize },

    #[error("The primary key of `{entity}` cannot change once assigned")]
    ImmutableIdentity { entity: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    Begin,
    Commit,
    Rollback,
}

impl Display for TransactionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Begin => "begin",
                Self::Commit => "commit",
                Self::Rollback => "roll back",
            }
        )
    }
}
