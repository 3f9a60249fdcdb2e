use std::{collections::HashMap, sync::Arc};

use itertools::Itertools;
use sky_manager_sqlparse::schema::{SqlSchema, SqlTable};
use tracing::warn;

use super::{
    DEFAULT_PRIMARY_KEY, EntityDeclaration, EntityDefinition,
    relation::{Link, OrphanPolicy, Pivot, Relation, RelationDeclaration, RelationKind},
};
use crate::error::{Error, Result, ValidationError};

/// Whether a registry name refers to a single instance or to a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Maps entity names (and collection names) to their registered definitions.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entities: HashMap<String, Arc<EntityDefinition>>,
    collections: HashMap<String, String>,
}

impl ModelRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The definition registered under the entity name `name`.
    ///
    /// # Errors
    ///
    /// If no entity is registered under `name`.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityDefinition>> {
        self.entities
            .get(name)
            .ok_or_else(|| ValidationError::UnknownEntity(name.to_string()).into())
    }

    /// Resolve either an entity name or a collection name.
    ///
    /// # Errors
    ///
    /// If `name` is neither.
    pub fn lookup(&self, name: &str) -> Result<(&Arc<EntityDefinition>, Cardinality)> {
        if let Some(definition) = self.entities.get(name) {
            return Ok((definition, Cardinality::One));
        }

        match self.collections.get(name) {
            Some(entity) => Ok((self.entity(entity)?, Cardinality::Many)),
            None => Err(ValidationError::UnknownEntity(name.to_string()).into()),
        }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.entities.values().sorted_by(|a, b| a.name().cmp(b.name()))
    }
}

/// Collects entity declarations and resolves them into a [`ModelRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declarations: Vec<EntityDeclaration>,
    schema: Option<SqlSchema>,
}

/// Table layout of a declared entity, known before its relations are resolved.
struct Layout<'a> {
    table: &'a str,
    primary_key: String,
    columns: Vec<String>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn entity(mut self, declaration: EntityDeclaration) -> Self {
        self.declarations.push(declaration);
        self
    }

    #[must_use]
    pub fn entities(mut self, declarations: impl IntoIterator<Item = EntityDeclaration>) -> Self {
        self.declarations.extend(declarations);
        self
    }

    /// Use `schema` to fill in columns and primary keys that declarations leave out, and to check
    /// pivot tables.
    #[must_use]
    pub fn schema(mut self, schema: SqlSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Resolve all declarations.
    ///
    /// # Errors
    ///
    /// If a name is registered twice, a relation points to an unknown entity or a missing column,
    /// or an entity's columns can neither be found in its declaration nor in the schema.
    pub fn build(self) -> Result<ModelRegistry> {
        if let Some(duplicate) = self
            .declarations
            .iter()
            .flat_map(|e| std::iter::once(&e.name).chain(e.collection.as_ref()))
            .duplicates()
            .next()
        {
            return Err(Error::definition(
                duplicate,
                "name is registered more than once",
            ));
        }

        let layouts = self
            .declarations
            .iter()
            .map(|e| Ok((e.name.as_str(), self.layout(e)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let mut registry = ModelRegistry::default();

        for declaration in &self.declarations {
            let layout = &layouts[declaration.name.as_str()];

            let relations = declaration
                .relations
                .iter()
                .map(|e| self.resolve_relation(declaration, layout, e, &layouts))
                .collect::<Result<Vec<_>>>()?;

            let definition = EntityDefinition::new(
                declaration.name.clone(),
                declaration.table.clone(),
                layout.primary_key.clone(),
                declaration.collection.clone(),
                layout.columns.clone(),
                relations,
            )?;

            if let Some(collection) = &declaration.collection {
                registry
                    .collections
                    .insert(collection.clone(), declaration.name.clone());
            }
            registry
                .entities
                .insert(declaration.name.clone(), Arc::new(definition));
        }

        Ok(registry)
    }

    fn table(&self, name: &str) -> Option<&SqlTable> {
        self.schema.as_ref().and_then(|e| e.find_table(name))
    }

    fn layout<'a>(&self, declaration: &'a EntityDeclaration) -> Result<Layout<'a>> {
        let table = self.table(&declaration.table);

        let columns = if declaration.columns.is_empty() {
            let Some(table) = table else {
                return Err(Error::definition(
                    &declaration.name,
                    format!(
                        "no columns declared, and table `{}` is not part of the schema",
                        declaration.table
                    ),
                ));
            };
            table.column_names().map(ToString::to_string).collect()
        } else {
            declaration.columns.clone()
        };

        let primary_key = declaration
            .primary_key
            .clone()
            .or_else(|| table.and_then(|e| e.primary_key.clone()))
            .unwrap_or_else(|| DEFAULT_PRIMARY_KEY.to_string());

        Ok(Layout {
            table: &declaration.table,
            primary_key,
            columns,
        })
    }

    fn resolve_relation(
        &self,
        owner: &EntityDeclaration,
        owner_layout: &Layout<'_>,
        declaration: &RelationDeclaration,
        layouts: &HashMap<&str, Layout<'_>>,
    ) -> Result<Relation> {
        let Some(target_layout) = layouts.get(declaration.target.as_str()) else {
            return Err(Error::definition(
                &owner.name,
                format!(
                    "relation `{}` targets unknown entity `{}`",
                    declaration.name, declaration.target
                ),
            ));
        };

        let missing_column = |table: &str, column: &str| {
            Error::definition(
                &owner.name,
                format!(
                    "relation `{}` needs column `{column}` on `{table}`",
                    declaration.name
                ),
            )
        };

        let link = match declaration.kind {
            RelationKind::BelongsTo => {
                let foreign_key = declaration
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", declaration.name));

                if !owner_layout.columns.contains(&foreign_key) {
                    return Err(missing_column(owner_layout.table, &foreign_key));
                }

                Link::BelongsTo { foreign_key }
            }
            RelationKind::HasMany => {
                let foreign_key = declaration
                    .foreign_key
                    .clone()
                    .unwrap_or_else(|| format!("{}_id", owner.name));

                if !target_layout.columns.contains(&foreign_key) {
                    return Err(missing_column(target_layout.table, &foreign_key));
                }

                if self
                    .table(target_layout.table)
                    .and_then(|e| e.find_column(&foreign_key))
                    .is_some_and(|e| !e.nullable)
                    && declaration.orphans == OrphanPolicy::Detach
                {
                    warn!(
                        "`{}.{}`: `{}.{foreign_key}` is NOT NULL, detaching orphans will be rejected by the store",
                        owner.name, declaration.name, target_layout.table
                    );
                }

                Link::HasMany {
                    foreign_key,
                    orphans: declaration.orphans,
                }
            }
            RelationKind::BelongsToMany => {
                let pivot = declaration.pivot.clone().unwrap_or_default();

                let pivot = Pivot {
                    table: pivot.table.unwrap_or_else(|| {
                        [owner_layout.table, target_layout.table]
                            .iter()
                            .sorted()
                            .join("_")
                    }),
                    local_key: pivot
                        .local_key
                        .unwrap_or_else(|| format!("{}_id", owner.name)),
                    other_key: pivot
                        .other_key
                        .unwrap_or_else(|| format!("{}_id", declaration.target)),
                    extra_columns: pivot.extra_columns,
                };

                if pivot.local_key.eq(&pivot.other_key) {
                    return Err(Error::definition(
                        &owner.name,
                        format!(
                            "relation `{}` uses `{}` for both pivot keys",
                            declaration.name, pivot.local_key
                        ),
                    ));
                }

                if let Some(table) = self.table(&pivot.table) {
                    if let Some(column) = pivot.columns().find(|e| table.find_column(e).is_none())
                    {
                        return Err(missing_column(&pivot.table, column));
                    }
                }

                Link::BelongsToMany { pivot }
            }
        };

        Ok(Relation {
            name: declaration.name.clone(),
            target: declaration.target.clone(),
            link,
        })
    }
}
