use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use futures::{FutureExt, future::BoxFuture};
use itertools::Itertools;
use serde_json::{Map, Value};
use sqlx::AnyConnection;
use tracing::{debug, trace, warn};

use crate::{
    config::{ManagerConfig, MissingRowPolicy, UnknownFieldPolicy},
    entity::{
        EntityDefinition, FieldKind, PIVOT_PREFIX,
        column::ColumnName,
        model::{Collection, IdentityKey, Instance, Related},
        registry::ModelRegistry,
        relation::{Link, OrphanPolicy, Pivot, Relation},
    },
    error::{Error, Result, ValidationError},
    query::{
        select::{Row, Select},
        write::{Delete, Insert, Update},
    },
};

/// Whether a stored value and a patch value denote the same thing, allowing for the way backends
/// hand back booleans and numbers.
fn same_value(stored: &Value, given: &Value) -> bool {
    match (stored, given) {
        (a, b) if a == b => true,
        (Value::Number(n), Value::Bool(b)) | (Value::Bool(b), Value::Number(n)) => {
            n.as_i64() == Some(i64::from(*b))
        }
        (Value::Number(a), Value::Number(b)) if a.is_f64() || b.is_f64() => {
            a.as_f64() == b.as_f64()
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_u64().is_some() && a.as_u64() == b.as_u64(),
        },
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.eq(&n.to_string())
        }
        _ => false,
    }
}

fn write_error(table: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::from_write(table, e)
}

/// A patch split up by what each key means to the entity.
struct Classified<'d> {
    columns: Map<String, Value>,
    pivot: Map<String, Value>,
    to_one: Vec<(&'d Relation, Option<Map<String, Value>>)>,
    to_many: Vec<(&'d Relation, Vec<Map<String, Value>>)>,
}

/// Applies nested patches to the store, one record at a time, depth first.
///
/// Belongs-to children are written before their owner so the owner's foreign key can point at
/// them. To-many children are written after it, since they need the owner's identity.
pub struct Reconciler<'a> {
    registry: &'a ModelRegistry,
    config: &'a ManagerConfig,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub const fn new(registry: &'a ModelRegistry, config: &'a ManagerConfig) -> Self {
        Self { registry, config }
    }

    /// Persist `patch` (or the instance's own attributes, if there is none) onto `instance`, and
    /// return the refreshed instance.
    ///
    /// If `patch` leaves out the primary key, the instance's own identity is used.
    ///
    /// # Errors
    ///
    /// If the patch does not fit the registered entities, or the store rejects a write. Writes
    /// made before the failure are not undone here; that is up to the surrounding transaction.
    pub async fn reconcile(
        &self,
        connection: &mut AnyConnection,
        instance: Instance,
        patch: Option<Map<String, Value>>,
    ) -> Result<Instance> {
        let definition = Arc::clone(instance.definition());
        let primary_key = definition.primary_key().to_string();

        let mut patch = patch.unwrap_or_else(|| instance.attributes().clone());

        match (
            instance.id(),
            patch.get(&primary_key).filter(|e| !e.is_null()),
        ) {
            (Some(id), Some(key)) if IdentityKey::of(id) != IdentityKey::of(key) => {
                return Err(ValidationError::ImmutableIdentity {
                    entity: definition.name().to_string(),
                }
                .into());
            }
            (Some(id), None) => {
                patch.insert(primary_key, id.clone());
            }
            _ => {}
        }

        let mut ancestors = vec![];
        self.save(
            connection,
            definition,
            Some(&instance),
            patch,
            0,
            &mut ancestors,
        )
        .await
    }

    fn classify<'d>(
        &self,
        definition: &'d EntityDefinition,
        patch: Map<String, Value>,
    ) -> Result<Classified<'d>> {
        let mut classified = Classified {
            columns: Map::new(),
            pivot: Map::new(),
            to_one: vec![],
            to_many: vec![],
        };

        for (key, value) in patch {
            match (definition.classify(&key), definition.relation(&key)) {
                (Some(FieldKind::Column), _) => {
                    classified.columns.insert(key, value);
                }
                (Some(FieldKind::PivotMetadata), _) => {
                    classified.pivot.insert(key, value);
                }
                (Some(FieldKind::Relation), Some(relation)) => {
                    let mismatch = |expected: &'static str| ValidationError::ShapeMismatch {
                        entity: definition.name().to_string(),
                        relation: relation.name.clone(),
                        expected,
                    };

                    if relation.is_to_many() {
                        let members = match value {
                            Value::Null => vec![],
                            Value::Array(items) => items
                                .into_iter()
                                .map(|e| match e {
                                    Value::Object(e) => Ok(e),
                                    _ => Err(mismatch("an array of objects")),
                                })
                                .collect::<Result<Vec<_>, _>>()?,
                            _ => return Err(mismatch("an array of objects").into()),
                        };
                        classified.to_many.push((relation, members));
                    } else {
                        let member = match value {
                            Value::Null => None,
                            Value::Object(e) => Some(e),
                            _ => return Err(mismatch("an object or null").into()),
                        };
                        classified.to_one.push((relation, member));
                    }
                }
                _ => match self.config.unknown_fields {
                    UnknownFieldPolicy::Reject => {
                        return Err(ValidationError::UnknownField {
                            entity: definition.name().to_string(),
                            key,
                        }
                        .into());
                    }
                    UnknownFieldPolicy::Ignore => {
                        warn!("Ignoring unknown key `{key}` on `{}`", definition.name());
                    }
                },
            }
        }

        Ok(classified)
    }

    /// Reconcile one record and everything nested below it.
    ///
    /// `original` is the in-memory instance this record was loaded as, if any. Its relation cache
    /// carries over to the result when it is the same record.
    fn save<'f>(
        &'f self,
        connection: &'f mut AnyConnection,
        definition: Arc<EntityDefinition>,
        original: Option<&'f Instance>,
        patch: Map<String, Value>,
        depth: usize,
        ancestors: &'f mut Vec<(String, IdentityKey)>,
    ) -> BoxFuture<'f, Result<Instance>> {
        async move {
            if depth > self.config.max_depth {
                return Err(ValidationError::DepthExceeded {
                    limit: self.config.max_depth,
                }
                .into());
            }

            let Classified {
                mut columns,
                pivot,
                to_one,
                to_many,
            } = self.classify(&definition, patch)?;

            let ancestor_len = ancestors.len();
            if let Some(key) = columns
                .get(definition.primary_key())
                .filter(|e| !e.is_null())
            {
                let node = (definition.name().to_string(), IdentityKey::of(key));
                if ancestors.contains(&node) {
                    return Err(ValidationError::Cycle {
                        entity: node.0,
                        key: key.clone(),
                    }
                    .into());
                }
                ancestors.push(node);
            }

            let mut written = BTreeMap::new();

            for (relation, member) in to_one {
                let Link::BelongsTo { foreign_key } = &relation.link else {
                    continue;
                };

                let Some(member) = member else {
                    columns.insert(foreign_key.clone(), Value::Null);
                    written.insert(relation.name.clone(), Related::One(None));
                    continue;
                };

                let target = Arc::clone(self.registry.entity(&relation.target)?);
                let cached = original
                    .and_then(|e| e.related(&relation.name))
                    .and_then(Related::as_one)
                    .filter(|e| same_record(e, &member));

                let child = self
                    .save(
                        &mut *connection,
                        target,
                        cached,
                        member,
                        depth + 1,
                        &mut *ancestors,
                    )
                    .await?;

                columns.insert(
                    foreign_key.clone(),
                    child.id().cloned().unwrap_or(Value::Null),
                );
                written.insert(relation.name.clone(), Related::One(Some(Box::new(child))));
            }

            let identity = self
                .write_row(&mut *connection, &definition, columns)
                .await?;

            if ancestors.len() == ancestor_len {
                ancestors.push((definition.name().to_string(), IdentityKey::of(&identity)));
            }

            let mut attributes = read_row(&mut *connection, &definition, &identity).await?;
            attributes.extend(pivot);

            for (relation, members) in to_many {
                let target = Arc::clone(self.registry.entity(&relation.target)?);
                let cached = original
                    .and_then(|e| e.related(&relation.name))
                    .and_then(Related::as_many);

                let mut children = Vec::with_capacity(members.len());

                match &relation.link {
                    Link::BelongsTo { .. } => continue,
                    Link::HasMany {
                        foreign_key,
                        orphans,
                    } => {
                        let existing = Select::new(target.table(), [target.primary_key()])
                            .filter(target.column(foreign_key).eq(identity.clone()))
                            .all(&mut *connection)
                            .await?;

                        for mut member in members {
                            member.insert(foreign_key.clone(), identity.clone());

                            let cached = cached
                                .and_then(|e| e.iter().find(|e| same_record(e, &member)));

                            children.push(
                                self.save(
                                    &mut *connection,
                                    Arc::clone(&target),
                                    cached,
                                    member,
                                    depth + 1,
                                    &mut *ancestors,
                                )
                                .await?,
                            );
                        }

                        let kept = children
                            .iter()
                            .filter_map(Instance::id)
                            .map(IdentityKey::of)
                            .collect::<HashSet<_>>();

                        let orphaned = existing
                            .into_iter()
                            .filter_map(|mut e| e.remove(target.primary_key()))
                            .filter(|e| !kept.contains(&IdentityKey::of(e)))
                            .collect::<Vec<_>>();

                        release_orphans(
                            &mut *connection,
                            &target,
                            foreign_key,
                            *orphans,
                            &identity,
                            orphaned,
                        )
                        .await?;
                    }
                    Link::BelongsToMany { pivot } => {
                        let mut links = Vec::with_capacity(members.len());

                        for member in members {
                            let extras = pivot
                                .extra_columns
                                .iter()
                                .filter_map(|column| {
                                    member
                                        .get(&format!("{PIVOT_PREFIX}{column}"))
                                        .map(|value| (column.clone(), value.clone()))
                                })
                                .collect::<Map<_, _>>();

                            let cached = cached
                                .and_then(|e| e.iter().find(|e| same_record(e, &member)));

                            let child = self
                                .save(
                                    &mut *connection,
                                    Arc::clone(&target),
                                    cached,
                                    member,
                                    depth + 1,
                                    &mut *ancestors,
                                )
                                .await?;

                            links.push((child.id().cloned().unwrap_or(Value::Null), extras));
                            children.push(child);
                        }

                        let rows = sync_pivot(&mut *connection, pivot, &identity, &links).await?;

                        for child in &mut children {
                            let Some(row) = child.id().and_then(|e| rows.get(&IdentityKey::of(e)))
                            else {
                                continue;
                            };

                            for column in pivot.columns() {
                                child.set(
                                    format!("{PIVOT_PREFIX}{column}"),
                                    row.get(column).cloned().unwrap_or(Value::Null),
                                )?;
                            }
                        }
                    }
                }

                written.insert(
                    relation.name.clone(),
                    Related::Many(Collection::new(target, children)),
                );
            }

            ancestors.truncate(ancestor_len);

            let relations = carried_relations(&definition, original, &identity, &attributes)
                .into_iter()
                .chain(written)
                .collect();

            Ok(Instance::from_parts(definition, attributes, relations))
        }
        .boxed()
    }

    /// Insert or update the entity's own row, returning its identity.
    async fn write_row(
        &self,
        connection: &mut AnyConnection,
        definition: &EntityDefinition,
        mut columns: Map<String, Value>,
    ) -> Result<Value> {
        let name = definition.name();
        let table = definition.table();
        let primary_key = definition.primary_key();

        let Some(key) = columns.get(primary_key).filter(|e| !e.is_null()).cloned() else {
            columns.remove(primary_key);

            let identity = Insert::new(table)
                .values(columns)
                .execute_returning(connection, primary_key)
                .await
                .map_err(write_error(table))?
                .ok_or_else(|| {
                    sqlx::Error::Protocol(format!(
                        "insert into `{table}` did not report a primary key"
                    ))
                })?;

            debug!("Inserted `{name}` {identity}");
            return Ok(identity);
        };

        let stored = Select::from_entity(definition)
            .filter(definition.primary_key_column().eq(key.clone()))
            .optional(&mut *connection)
            .await?;

        let Some(stored) = stored else {
            return match self.config.missing_rows {
                MissingRowPolicy::Fail => Err(Error::NotFound {
                    entity: name.to_string(),
                    key,
                }),
                MissingRowPolicy::Insert => {
                    Insert::new(table)
                        .values(columns)
                        .execute(connection)
                        .await
                        .map_err(write_error(table))?;

                    debug!("Inserted `{name}` {key}, which had no row yet");
                    Ok(key)
                }
            };
        };

        let changed = columns
            .into_iter()
            .filter(|(column, value)| !stored.get(column).is_some_and(|e| same_value(e, value)))
            .collect::<Vec<_>>();

        if changed.is_empty() {
            trace!("`{name}` {key} is unchanged");
            return Ok(key);
        }

        debug!(
            "Updating `{name}` {key}: {}",
            changed.iter().map(|(column, _)| column).join(", ")
        );

        changed
            .into_iter()
            .fold(Update::new(table), |update, (column, value)| {
                update.set(column, value)
            })
            .filter(definition.primary_key_column().eq(key.clone()))
            .execute(connection)
            .await
            .map_err(write_error(table))?;

        Ok(key)
    }
}

/// Whether `instance` is the stored record a patch object targets.
fn same_record(instance: &Instance, patch: &Map<String, Value>) -> bool {
    match (
        instance.id(),
        patch.get(instance.definition().primary_key()),
    ) {
        (Some(a), Some(b)) => IdentityKey::of(a) == IdentityKey::of(b),
        _ => false,
    }
}

async fn read_row(
    connection: &mut AnyConnection,
    definition: &EntityDefinition,
    identity: &Value,
) -> Result<Row> {
    Select::from_entity(definition)
        .filter(definition.primary_key_column().eq(identity.clone()))
        .optional(connection)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: definition.name().to_string(),
            key: identity.clone(),
        })
}

/// Relations cached on `original` that still describe the record after it was written.
fn carried_relations(
    definition: &EntityDefinition,
    original: Option<&Instance>,
    identity: &Value,
    attributes: &Row,
) -> BTreeMap<String, Related> {
    let Some(original) = original.filter(|e| {
        e.id()
            .is_some_and(|id| IdentityKey::of(id) == IdentityKey::of(identity))
    }) else {
        return BTreeMap::new();
    };

    original
        .relations()
        .iter()
        .filter(|(name, _)| {
            let Some(Link::BelongsTo { foreign_key }) = definition.relation(name).map(|e| &e.link)
            else {
                return true;
            };

            // a cached parent is stale once the foreign key points elsewhere
            match (original.get(foreign_key), attributes.get(foreign_key)) {
                (Some(before), Some(after)) => same_value(before, after),
                (None, _) => false,
                (Some(_), None) => true,
            }
        })
        .map(|(name, related)| (name.clone(), related.clone()))
        .collect()
}

/// Unlink has-many rows of `owner` that were left out of a save.
async fn release_orphans(
    connection: &mut AnyConnection,
    target: &EntityDefinition,
    foreign_key: &str,
    policy: OrphanPolicy,
    owner: &Value,
    orphaned: Vec<Value>,
) -> Result<()> {
    if orphaned.is_empty() {
        return Ok(());
    }

    let count = orphaned.len();
    let table = target.table();
    let scope = target.column(foreign_key).eq(owner.clone());
    let members = target.primary_key_column().is_in(orphaned);

    match policy {
        OrphanPolicy::Detach => {
            Update::new(table)
                .set(foreign_key, Value::Null)
                .filter(scope)
                .filter(members)
                .execute(connection)
                .await
                .map_err(write_error(table))?;

            debug!("Detached {count} `{}` row(s) from {owner}", target.name());
        }
        OrphanPolicy::Delete => {
            Delete::new(table)
                .filter(scope)
                .filter(members)
                .execute(connection)
                .await
                .map_err(write_error(table))?;

            debug!("Deleted {count} orphaned `{}` row(s)", target.name());
        }
    }

    Ok(())
}

/// Make the pivot rows of `owner` match `links` (target identity, extra pivot columns), and
/// return the resulting pivot rows keyed by target identity.
async fn sync_pivot(
    connection: &mut AnyConnection,
    pivot: &Pivot,
    owner: &Value,
    links: &[(Value, Map<String, Value>)],
) -> Result<HashMap<IdentityKey, Row>> {
    let table = pivot.table.as_str();
    let local = ColumnName::new_with_table_or_alias(table, &pivot.local_key);
    let other = ColumnName::new_with_table_or_alias(table, &pivot.other_key);

    let select = || {
        Select::new(table, pivot.columns())
            .filter(local.clone().eq(owner.clone()))
            .order_by(other.clone())
    };

    let mut existing = HashMap::new();
    for row in select().all(&mut *connection).await? {
        if let Some(target) = row.get(&pivot.other_key) {
            existing.entry(IdentityKey::of(target)).or_insert(row);
        }
    }

    let wanted = links
        .iter()
        .map(|(target, _)| IdentityKey::of(target))
        .collect::<HashSet<_>>();

    let stale = existing
        .iter()
        .filter(|(key, _)| !wanted.contains(*key))
        .filter_map(|(_, row)| row.get(&pivot.other_key).cloned())
        .collect::<Vec<_>>();

    if !stale.is_empty() {
        let count = Delete::new(table)
            .filter(local.clone().eq(owner.clone()))
            .filter(other.clone().is_in(stale))
            .execute(&mut *connection)
            .await
            .map_err(write_error(table))?;

        debug!("Unlinked {count} `{table}` row(s) from {owner}");
    }

    let mut seen = HashSet::new();

    for (target, extras) in links {
        let key = IdentityKey::of(target);
        if !seen.insert(key.clone()) {
            continue;
        }

        if let Some(row) = existing.get(&key) {
            let changed = extras
                .iter()
                .filter(|(column, value)| !row.get(*column).is_some_and(|e| same_value(e, value)))
                .collect::<Vec<_>>();

            if changed.is_empty() {
                continue;
            }

            changed
                .into_iter()
                .fold(Update::new(table), |update, (column, value)| {
                    update.set(column, value.clone())
                })
                .filter(local.clone().eq(owner.clone()))
                .filter(other.clone().eq(target.clone()))
                .execute(&mut *connection)
                .await
                .map_err(write_error(table))?;

            debug!("Updated `{table}` row {owner} -> {target}");
        } else {
            Insert::new(table)
                .value(&pivot.local_key, owner.clone())
                .value(&pivot.other_key, target.clone())
                .values(extras.clone())
                .execute(&mut *connection)
                .await
                .map_err(write_error(table))?;

            debug!("Linked {owner} -> {target} in `{table}`");
        }
    }

    let mut rows = HashMap::new();
    for row in select().all(connection).await? {
        if let Some(target) = row.get(&pivot.other_key) {
            rows.entry(IdentityKey::of(target)).or_insert(row);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::same_value;

    #[test]
    fn test_same_value() {
        assert!(same_value(&json!(1), &json!(1)));
        assert!(same_value(&json!(1), &json!(true)));
        assert!(same_value(&json!(2), &json!(2.0)));
        assert!(same_value(&json!(1), &json!("1")));
        assert!(same_value(&json!(null), &json!(null)));
        assert!(!same_value(&json!(null), &json!(0)));
        assert!(!same_value(&json!("Grey"), &json!("Black")));
        assert!(!same_value(&json!(0), &json!(true)));
        assert!(!same_value(
            &json!(9_007_199_254_740_992_i64),
            &json!(9_007_199_254_740_993_i64)
        ));
        assert!(!same_value(&json!(u64::MAX), &json!(u64::MAX - 1)));
        assert!(same_value(&json!(u64::MAX), &json!(u64::MAX)));
    }
}
