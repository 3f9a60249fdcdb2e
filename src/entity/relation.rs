use serde::{Deserialize, Serialize};

/// How two entities are associated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// The owner holds a foreign key to the target (many-to-one / one-to-one, owning side).
    BelongsTo,
    /// The target holds a foreign key to the owner (one-to-many, non-owning side).
    HasMany,
    /// Owner and target are linked through a pivot table (many-to-many).
    BelongsToMany,
}

/// What happens to has-many members that are dropped from a collection during a save.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Clear the foreign key on the orphaned row, leaving the row in place.
    #[default]
    Detach,
    /// Delete the orphaned row.
    Delete,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotDeclaration {
    #[serde(default)]
    pub table: Option<String>,
    /// Pivot column referencing the owner.
    #[serde(default)]
    pub local_key: Option<String>,
    /// Pivot column referencing the target.
    #[serde(default)]
    pub other_key: Option<String>,
    /// Additional pivot columns exposed as `_pivot_<column>` attributes on the target.
    #[serde(default)]
    pub extra_columns: Vec<String>,
}

/// A relation as written down by the user. Unset keys are filled in with naming conventions when
/// the owning entity is registered, see [`Link`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelationDeclaration {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub pivot: Option<PivotDeclaration>,
    #[serde(default)]
    pub orphans: OrphanPolicy,
}

impl RelationDeclaration {
    fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            foreign_key: None,
            pivot: None,
            orphans: OrphanPolicy::default(),
        }
    }

    #[must_use]
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::BelongsTo, target)
    }

    #[must_use]
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::HasMany, target)
    }

    #[must_use]
    pub fn belongs_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, RelationKind::BelongsToMany, target)
    }

    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>) -> Self {
        self.foreign_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn pivot_table(mut self, table: impl Into<String>) -> Self {
        self.pivot.get_or_insert_default().table = Some(table.into());
        self
    }

    #[must_use]
    pub fn pivot_keys(mut self, local_key: impl Into<String>, other_key: impl Into<String>) -> Self {
        let pivot = self.pivot.get_or_insert_default();
        pivot.local_key = Some(local_key.into());
        pivot.other_key = Some(other_key.into());
        self
    }

    /// Expose additional pivot columns on the related entity.
    #[must_use]
    pub fn with_pivot<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pivot
            .get_or_insert_default()
            .extra_columns
            .extend(columns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn orphans(mut self, policy: OrphanPolicy) -> Self {
        self.orphans = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pivot {
    pub table: String,
    pub local_key: String,
    pub other_key: String,
    pub extra_columns: Vec<String>,
}

impl Pivot {
    /// Every pivot column surfaced on the related entity, in the order they are selected.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        [self.local_key.as_str(), self.other_key.as_str()]
            .into_iter()
            .chain(self.extra_columns.iter().map(String::as_str))
    }
}

/// The resolved storage layout of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// `foreign_key` is a column of the owner.
    BelongsTo { foreign_key: String },
    /// `foreign_key` is a column of the target.
    HasMany {
        foreign_key: String,
        orphans: OrphanPolicy,
    },
    BelongsToMany { pivot: Pivot },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: String,
    pub target: String,
    pub link: Link,
}

impl Relation {
    #[must_use]
    pub const fn kind(&self) -> RelationKind {
        match self.link {
            Link::BelongsTo { .. } => RelationKind::BelongsTo,
            Link::HasMany { .. } => RelationKind::HasMany,
            Link::BelongsToMany { .. } => RelationKind::BelongsToMany,
        }
    }

    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        !matches!(self.link, Link::BelongsTo { .. })
    }
}
