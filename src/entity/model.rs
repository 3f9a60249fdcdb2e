use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::{EntityDefinition, FieldKind};
use crate::error::{Result, ValidationError};

/// A primary key value normalised for comparisons, so that `1` and `"1"` identify the same row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(e) => Self(e.clone()),
            e => Self(e.to_string()),
        }
    }
}

impl Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A materialized relation.
#[derive(Debug, Clone)]
pub enum Related {
    One(Option<Box<Instance>>),
    Many(Collection),
}

impl Related {
    #[must_use]
    pub fn as_one(&self) -> Option<&Instance> {
        match self {
            Self::One(e) => e.as_deref(),
            Self::Many(_) => None,
        }
    }

    #[must_use]
    pub const fn as_many(&self) -> Option<&Collection> {
        match self {
            Self::One(_) => None,
            Self::Many(e) => Some(e),
        }
    }

    /// Number of related instances.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::One(e) => usize::from(e.is_some()),
            Self::Many(e) => e.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::One(e) => e.as_ref().map_or(Value::Null, |e| e.to_json()),
            Self::Many(e) => e.to_json(),
        }
    }
}

/// An in-memory record of one entity: its attributes, its identity (the primary key attribute)
/// and whichever relations have been materialized.
#[derive(Debug, Clone)]
pub struct Instance {
    definition: Arc<EntityDefinition>,
    attributes: Map<String, Value>,
    relations: BTreeMap<String, Related>,
}

impl Instance {
    #[must_use]
    pub fn new(definition: Arc<EntityDefinition>) -> Self {
        Self {
            definition,
            attributes: Map::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Construct an unsaved instance holding `attributes`.
    ///
    /// # Errors
    ///
    /// If `attributes` is not an object, or contains keys that are not columns of the entity.
    pub fn with_attributes(definition: Arc<EntityDefinition>, attributes: Value) -> Result<Self> {
        let Value::Object(attributes) = attributes else {
            return Err(ValidationError::NotAnObject {
                what: "instance attributes",
            }
            .into());
        };

        let mut this = Self::new(definition);
        for (key, value) in attributes {
            this.set(key, value)?;
        }

        Ok(this)
    }

    /// Build an instance straight from a stored row.
    pub(crate) fn from_row(
        definition: Arc<EntityDefinition>,
        attributes: Map<String, Value>,
    ) -> Self {
        Self {
            definition,
            attributes,
            relations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    /// The name of this instance's entity.
    #[must_use]
    pub fn entity(&self) -> &str {
        self.definition.name()
    }

    /// The primary key value, or `None` if this instance has not been stored yet.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        self.attributes
            .get(self.definition.primary_key())
            .filter(|e| !e.is_null())
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    #[must_use]
    pub const fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// Set a column attribute, or a `_pivot_*` attribute.
    ///
    /// # Errors
    ///
    /// If `key` is not a column of the entity, or if it would change an identity that was already
    /// assigned.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<&mut Self> {
        let key = key.into();
        let value = value.into();

        match self.definition.classify(&key) {
            Some(FieldKind::Column | FieldKind::PivotMetadata) => {}
            Some(FieldKind::Relation) | None => {
                return Err(ValidationError::UnknownField {
                    entity: self.entity().to_string(),
                    key,
                }
                .into());
            }
        }

        if key.eq(self.definition.primary_key())
            && self
                .id()
                .is_some_and(|e| IdentityKey::of(e) != IdentityKey::of(&value))
        {
            return Err(ValidationError::ImmutableIdentity {
                entity: self.entity().to_string(),
            }
            .into());
        }

        self.attributes.insert(key, value);
        Ok(self)
    }

    /// A materialized relation, if it was eagerly fetched or written by a save.
    #[must_use]
    pub fn related(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    pub(crate) fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub(crate) fn set_related(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    pub(crate) fn from_parts(
        definition: Arc<EntityDefinition>,
        attributes: Map<String, Value>,
        relations: BTreeMap<String, Related>,
    ) -> Self {
        Self {
            definition,
            attributes,
            relations,
        }
    }

    /// Serialize attributes and materialized relations into one JSON object, relations keyed by
    /// their name.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut json = self.attributes.clone();
        json.extend(
            self.relations
                .iter()
                .map(|(name, related)| (name.clone(), related.to_json())),
        );

        Value::Object(json)
    }
}

impl Serialize for Instance {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

/// An ordered list of instances of one entity.
#[derive(Debug, Clone)]
pub struct Collection {
    definition: Arc<EntityDefinition>,
    models: Vec<Instance>,
}

impl Collection {
    #[must_use]
    pub const fn new(definition: Arc<EntityDefinition>, models: Vec<Instance>) -> Self {
        Self { definition, models }
    }

    #[must_use]
    pub const fn definition(&self) -> &Arc<EntityDefinition> {
        &self.definition
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<&Instance> {
        self.models.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instance> {
        self.models.iter()
    }

    #[must_use]
    pub fn into_models(self) -> Vec<Instance> {
        self.models
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(self.models.iter().map(Instance::to_json).collect())
    }
}

impl IntoIterator for Collection {
    type Item = Instance;
    type IntoIter = std::vec::IntoIter<Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}

impl Serialize for Collection {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(&self.models)
    }
}
