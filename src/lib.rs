//! Save and fetch nested records over an sqlx database.
//!
//! A [`Manager`] takes an [`Instance`] and a nested JSON patch, and writes the instance along
//! with every related record the patch mentions, inside one transaction. Objects in the patch
//! update or create belongs-to parents, arrays fully replace has-many and belongs-to-many
//! members.

pub mod config;
pub mod eager;
pub mod entity;
pub mod error;
pub mod manager;
pub mod query;
pub mod reconcile;
pub mod transaction;

pub use config::{ManagerConfig, MissingRowPolicy, UnknownFieldPolicy};
pub use entity::{
    EntityDeclaration, EntityDefinition,
    model::{Collection, Instance, Related},
    registry::ModelRegistry,
    relation::{OrphanPolicy, RelationDeclaration},
};
pub use error::{Error, Result, ValidationError};
pub use manager::{Fetched, Manager, Options};
pub use transaction::TransactionScope;

pub use sqlx;
