pub mod column;
pub mod model;
pub mod registry;
pub mod relation;

use std::{collections::HashMap, sync::Arc};

use column::ColumnName;
use model::Instance;
use relation::{Relation, RelationDeclaration};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Primary key column used when an entity does not declare one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Prefix marking attributes that describe a pivot row rather than the entity itself.
pub const PIVOT_PREFIX: &str = "_pivot_";

/// An entity as written down by the user, e.g. in a registry file.
///
/// `columns` may be left empty when the registry is built with a
/// [`SqlSchema`](sky_manager_sqlparse::schema::SqlSchema) that contains `table`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntityDeclaration {
    pub name: String,
    pub table: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Name under which a fetch returns every matching row rather than the first one.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDeclaration>,
}

impl EntityDeclaration {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: None,
            collection: None,
            columns: vec![],
            relations: vec![],
        }
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDeclaration) -> Self {
        self.relations.push(relation);
        self
    }
}

/// How a patch key is applied to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Column,
    Relation,
    /// A `_pivot_*` key, only meaningful to the pivot row of a belongs-to-many relation.
    PivotMetadata,
}

/// A registered entity. Immutable once registered, and shared between instances through an
/// [`Arc`].
#[derive(Debug)]
pub struct EntityDefinition {
    name: String,
    table: String,
    primary_key: String,
    collection: Option<String>,
    columns: Vec<String>,
    relations: Vec<Relation>,
    fields: HashMap<String, FieldKind>,
}

impl EntityDefinition {
    pub(crate) fn new(
        name: String,
        table: String,
        primary_key: String,
        collection: Option<String>,
        columns: Vec<String>,
        relations: Vec<Relation>,
    ) -> Result<Self> {
        if !columns.contains(&primary_key) {
            return Err(Error::definition(
                &name,
                format!("primary key `{primary_key}` is not one of its columns"),
            ));
        }

        let mut fields = HashMap::new();

        for (field, kind) in columns
            .iter()
            .map(|e| (e, FieldKind::Column))
            .chain(relations.iter().map(|e| (&e.name, FieldKind::Relation)))
        {
            if field.starts_with(PIVOT_PREFIX) {
                return Err(Error::definition(
                    &name,
                    format!("`{field}` uses the reserved `{PIVOT_PREFIX}` prefix"),
                ));
            }

            if fields.insert(field.clone(), kind).is_some() {
                return Err(Error::definition(
                    &name,
                    format!("`{field}` is declared more than once"),
                ));
            }
        }

        Ok(Self {
            name,
            table,
            primary_key,
            collection,
            columns,
            relations,
            fields,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of this entity's table in the database.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|e| e.name.eq(name))
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(FieldKind::Column))
    }

    /// Classify a patch key, or `None` if it is neither a column, a relation nor pivot metadata.
    #[must_use]
    pub fn classify(&self, key: &str) -> Option<FieldKind> {
        if key.starts_with(PIVOT_PREFIX) {
            Some(FieldKind::PivotMetadata)
        } else {
            self.fields.get(key).copied()
        }
    }

    /// The fully qualified name of `column`, i.e. `"table"."column"`.
    #[must_use]
    pub fn column(&self, column: &str) -> ColumnName {
        ColumnName::new_with_table_or_alias(&self.table, column)
    }

    #[must_use]
    pub fn primary_key_column(&self) -> ColumnName {
        self.column(&self.primary_key)
    }

    /// Construct a new, unsaved instance of this entity.
    #[must_use]
    pub fn forge(self: &Arc<Self>) -> Instance {
        Instance::new(Arc::clone(self))
    }
}
