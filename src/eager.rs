use std::{collections::BTreeMap, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use itertools::Itertools;
use serde_json::Value;
use sqlx::AnyConnection;

use crate::{
    entity::{
        EntityDefinition, PIVOT_PREFIX,
        column::ColumnName,
        model::{Collection, IdentityKey, Instance, Related},
        registry::ModelRegistry,
        relation::Link,
    },
    error::{Result, ValidationError},
    query::select::Select,
};

/// A set of dot-separated relation paths, e.g. `["dealers", "dealers.cars.color"]`, as a tree
/// of relation names.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EagerPaths {
    children: BTreeMap<String, EagerPaths>,
}

impl EagerPaths {
    /// Parse `paths` relative to `root`, checking every segment against the registry.
    ///
    /// # Errors
    ///
    /// If a segment does not name a relation of the entity it is applied to.
    pub fn parse<S: AsRef<str>>(
        registry: &ModelRegistry,
        root: &EntityDefinition,
        paths: &[S],
    ) -> Result<Self> {
        let mut tree = Self::default();

        for path in paths {
            let path = path.as_ref();
            let mut node = &mut tree;
            let mut definition = root;

            for segment in path.split('.') {
                let Some(relation) = definition.relation(segment) else {
                    return Err(ValidationError::UnknownRelation {
                        entity: definition.name().to_string(),
                        relation: segment.to_string(),
                        path: path.to_string(),
                    }
                    .into());
                };

                definition = registry.entity(&relation.target)?.as_ref();
                node = node.children.entry(segment.to_string()).or_default();
            }
        }

        Ok(tree)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Materialize every path on `instances`, which must all be instances of `definition`.
    pub(crate) fn load<'a>(
        &'a self,
        connection: &'a mut AnyConnection,
        registry: &'a ModelRegistry,
        definition: &'a EntityDefinition,
        instances: &'a mut [Instance],
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if instances.is_empty() {
                return Ok(());
            }

            for (name, subtree) in &self.children {
                let Some(relation) = definition.relation(name) else {
                    continue;
                };
                let target = registry.entity(&relation.target)?;

                match &relation.link {
                    Link::BelongsTo { foreign_key } => {
                        let keys = unique_values(instances.iter().filter_map(|e| e.get(foreign_key)));

                        let mut related = fetch_in(
                            &mut *connection,
                            target,
                            target.primary_key_column(),
                            keys,
                        )
                        .await?;
                        subtree
                            .load(&mut *connection, registry, target, &mut related)
                            .await?;

                        let related = related
                            .into_iter()
                            .filter_map(|e| Some((IdentityKey::of(e.id()?), e)))
                            .collect::<BTreeMap<_, _>>();

                        for instance in instances.iter_mut() {
                            let parent = instance
                                .get(foreign_key)
                                .and_then(|e| related.get(&IdentityKey::of(e)))
                                .cloned()
                                .map(Box::new);
                            instance.set_related(name, Related::One(parent));
                        }
                    }
                    Link::HasMany { foreign_key, .. } => {
                        let keys = unique_values(instances.iter().filter_map(Instance::id));

                        let mut related = fetch_in(
                            &mut *connection,
                            target,
                            target.column(foreign_key),
                            keys,
                        )
                        .await?;
                        subtree
                            .load(&mut *connection, registry, target, &mut related)
                            .await?;

                        let mut groups = related
                            .into_iter()
                            .filter_map(|e| Some((IdentityKey::of(e.get(foreign_key)?), e)))
                            .into_group_map();

                        for instance in instances.iter_mut() {
                            let members = instance
                                .id()
                                .and_then(|e| groups.remove(&IdentityKey::of(e)))
                                .unwrap_or_default();
                            instance.set_related(
                                name,
                                Related::Many(Collection::new(Arc::clone(target), members)),
                            );
                        }
                    }
                    Link::BelongsToMany { pivot } => {
                        let keys = unique_values(instances.iter().filter_map(Instance::id));

                        let links = if keys.is_empty() {
                            vec![]
                        } else {
                            Select::new(&pivot.table, pivot.columns())
                                .filter(
                                    ColumnName::new_with_table_or_alias(&pivot.table, &pivot.local_key)
                                        .is_in(keys),
                                )
                                .order_by(ColumnName::new_with_table_or_alias(
                                    &pivot.table,
                                    &pivot.local_key,
                                ))
                                .order_by(ColumnName::new_with_table_or_alias(
                                    &pivot.table,
                                    &pivot.other_key,
                                ))
                                .all(&mut *connection)
                                .await?
                        };

                        let mut related = fetch_in(
                            &mut *connection,
                            target,
                            target.primary_key_column(),
                            unique_values(links.iter().filter_map(|e| e.get(&pivot.other_key))),
                        )
                        .await?;
                        subtree
                            .load(&mut *connection, registry, target, &mut related)
                            .await?;

                        let related = related
                            .into_iter()
                            .filter_map(|e| Some((IdentityKey::of(e.id()?), e)))
                            .collect::<BTreeMap<_, _>>();

                        let mut groups = BTreeMap::<IdentityKey, Vec<Instance>>::new();
                        for link in &links {
                            let (Some(local), Some(member)) = (
                                link.get(&pivot.local_key),
                                link.get(&pivot.other_key)
                                    .and_then(|e| related.get(&IdentityKey::of(e))),
                            ) else {
                                continue;
                            };

                            let mut member = member.clone();
                            for column in pivot.columns() {
                                member.set(
                                    format!("{PIVOT_PREFIX}{column}"),
                                    link.get(column).cloned().unwrap_or(Value::Null),
                                )?;
                            }
                            groups.entry(IdentityKey::of(local)).or_default().push(member);
                        }

                        for instance in instances.iter_mut() {
                            let members = instance
                                .id()
                                .and_then(|e| groups.remove(&IdentityKey::of(e)))
                                .unwrap_or_default();
                            instance.set_related(
                                name,
                                Related::Many(Collection::new(Arc::clone(target), members)),
                            );
                        }
                    }
                }
            }

            Ok(())
        }
        .boxed()
    }
}

/// Non-null values, once each, in order of first appearance.
fn unique_values<'v>(values: impl Iterator<Item = &'v Value>) -> Vec<Value> {
    values
        .filter(|e| !e.is_null())
        .unique_by(|e| IdentityKey::of(e))
        .cloned()
        .collect()
}

/// All rows of `definition` whose `column` is one of `keys`, in primary key order.
async fn fetch_in(
    connection: &mut AnyConnection,
    definition: &Arc<EntityDefinition>,
    column: ColumnName,
    keys: Vec<Value>,
) -> Result<Vec<Instance>> {
    if keys.is_empty() {
        return Ok(vec![]);
    }

    Ok(Select::from_entity(definition)
        .filter(column.is_in(keys))
        .order_by(definition.primary_key_column())
        .all(connection)
        .await?
        .into_iter()
        .map(|row| Instance::from_row(Arc::clone(definition), row))
        .collect())
}
