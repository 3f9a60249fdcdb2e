use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use sky_manager_sqlparse::db::get_database_url;
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, instrument};

use crate::{
    config::ManagerConfig,
    eager::EagerPaths,
    entity::{
        EntityDefinition,
        model::{Collection, Instance},
        registry::{Cardinality, ModelRegistry},
    },
    error::{Error, Result, ValidationError},
    query::select::Select,
    reconcile::Reconciler,
    transaction::{TransactionScope, run_in_transaction},
};

/// Per-call options for [`Manager::save`], [`Manager::fetch`] and [`Manager::reload`].
#[derive(Default)]
pub struct Options<'t> {
    transacting: Option<&'t mut AnyConnection>,
}

impl<'t> Options<'t> {
    /// Run inside the caller's transaction. The manager neither commits nor rolls it back.
    pub fn transacting(connection: &'t mut AnyConnection) -> Self {
        Self {
            transacting: Some(connection),
        }
    }
}

/// The result of [`Manager::fetch`].
#[derive(Debug, Clone)]
pub enum Fetched {
    /// Fetched through an entity name: the first match, if any.
    One(Option<Instance>),
    /// Fetched through a collection name: every match.
    Many(Collection),
}

impl Fetched {
    #[must_use]
    pub fn into_one(self) -> Option<Instance> {
        match self {
            Self::One(e) => e,
            Self::Many(e) => e.into_iter().next(),
        }
    }

    #[must_use]
    pub fn into_many(self) -> Vec<Instance> {
        match self {
            Self::One(e) => e.into_iter().collect(),
            Self::Many(e) => e.into_models(),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::One(e) => e.as_ref().map_or(Value::Null, Instance::to_json),
            Self::Many(e) => e.to_json(),
        }
    }
}

impl Serialize for Fetched {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

fn as_object(value: Option<Value>, what: &'static str) -> Result<Option<Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(e)) => Ok(Some(e)),
        Some(_) => Err(ValidationError::NotAnObject { what }.into()),
    }
}

/// Saves nested patches and fetches nested records for the entities of a [`ModelRegistry`].
///
/// Cloning a manager is cheap; clones share the pool and the registry.
#[derive(Debug, Clone)]
pub struct Manager {
    pool: AnyPool,
    registry: Arc<ModelRegistry>,
    config: Arc<ManagerConfig>,
}

impl Manager {
    #[must_use]
    pub fn new(pool: AnyPool, registry: ModelRegistry) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            config: Arc::new(ManagerConfig::default()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// If the connection fails.
    pub async fn connect(url: &str, registry: ModelRegistry) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPool::connect(url).await?;
        debug!("Connected to the database");

        Ok(Self::new(pool, registry))
    }

    /// Connect to the database named by `DATABASE_URL`, from the environment or a `.env` file.
    ///
    /// # Errors
    ///
    /// If the variable is not set, or the connection fails.
    pub async fn from_env(registry: ModelRegistry) -> Result<Self> {
        let url = get_database_url().ok_or(Error::MissingDatabaseUrl)?;
        Self::connect(&url, registry).await
    }

    #[must_use]
    pub const fn pool(&self) -> &AnyPool {
        &self.pool
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The definition registered under the entity or collection name `name`.
    ///
    /// # Errors
    ///
    /// If nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<EntityDefinition>> {
        self.registry
            .lookup(name)
            .map(|(definition, _)| Arc::clone(definition))
    }

    /// A new, unsaved instance of `name`.
    ///
    /// # Errors
    ///
    /// If nothing is registered under `name`.
    pub fn forge(&self, name: &str) -> Result<Instance> {
        Ok(self.get(name)?.forge())
    }

    /// Persist `patch` onto `instance` and every record nested in it, returning the refreshed
    /// instance. Without a patch the instance saves its own attributes.
    ///
    /// Unless `options` carries a transaction, the save runs in a transaction of its own.
    ///
    /// # Errors
    ///
    /// If the patch does not fit the registered entities, or the store rejects a write. Nothing
    /// is written in that case.
    #[instrument(skip_all, fields(entity = %instance.entity()))]
    pub async fn save(
        &self,
        instance: Instance,
        patch: Option<Value>,
        options: Options<'_>,
    ) -> Result<Instance> {
        let patch = as_object(patch, "patch")?;
        let reconciler = Reconciler::new(&self.registry, &self.config);

        if let Some(connection) = options.transacting {
            return reconciler.reconcile(connection, instance, patch).await;
        }

        let mut scope = TransactionScope::begin(&self.pool).await?;
        let outcome = reconciler
            .reconcile(scope.connection(), instance, patch)
            .await;
        scope.finish(outcome).await
    }

    /// Fetch `name` matching `criteria`, with the relation paths in `eager` materialized.
    ///
    /// Through an entity name this fetches the first match in primary key order, through a
    /// collection name all of them. `criteria` maps column names to the values they must equal.
    ///
    /// # Errors
    ///
    /// If `name`, a criteria column or an eager path is unknown, or the query fails.
    #[instrument(skip(self, criteria, options))]
    pub async fn fetch(
        &self,
        name: &str,
        criteria: Option<Value>,
        eager: &[&str],
        options: Options<'_>,
    ) -> Result<Fetched> {
        let (definition, cardinality) = self.registry.lookup(name)?;
        let paths = EagerPaths::parse(&self.registry, definition, eager)?;

        let mut select = Select::from_entity(definition);
        for (column, value) in as_object(criteria, "criteria")?.unwrap_or_default() {
            if !definition.has_column(&column) {
                return Err(ValidationError::UnknownField {
                    entity: definition.name().to_string(),
                    key: column,
                }
                .into());
            }
            select = select.filter(definition.column(&column).eq(value));
        }
        select = select.order_by(definition.primary_key_column());
        if cardinality == Cardinality::One {
            select = select.limit(1);
        }

        let mut acquired;
        let connection = match options.transacting {
            Some(connection) => connection,
            None => {
                acquired = self.pool.acquire().await?;
                &mut *acquired
            }
        };

        let mut instances = select
            .all(&mut *connection)
            .await?
            .into_iter()
            .map(|row| Instance::from_row(Arc::clone(definition), row))
            .collect::<Vec<_>>();

        paths
            .load(connection, &self.registry, definition, &mut instances)
            .await?;

        debug!("Fetched {} `{}` row(s)", instances.len(), definition.name());

        Ok(match cardinality {
            Cardinality::One => Fetched::One(instances.into_iter().next()),
            Cardinality::Many => Fetched::Many(Collection::new(Arc::clone(definition), instances)),
        })
    }

    /// Read `instance` again by its identity, with the relation paths in `eager` materialized.
    ///
    /// # Errors
    ///
    /// If the instance has no identity, its row no longer exists, or the query fails.
    pub async fn reload(
        &self,
        instance: &Instance,
        eager: &[&str],
        options: Options<'_>,
    ) -> Result<Instance> {
        let not_found = || Error::NotFound {
            entity: instance.entity().to_string(),
            key: instance.id().cloned().unwrap_or(Value::Null),
        };

        let id = instance.id().ok_or_else(not_found)?;
        let criteria = Value::Object(Map::from_iter([(
            instance.definition().primary_key().to_string(),
            id.clone(),
        )]));

        self.fetch(instance.entity(), Some(criteria), eager, options)
            .await?
            .into_one()
            .ok_or_else(not_found)
    }

    /// Begin a transaction to pass to several calls through [`Options::transacting`].
    ///
    /// # Errors
    ///
    /// If the transaction could not be started.
    pub async fn begin(&self) -> Result<TransactionScope> {
        TransactionScope::begin(&self.pool).await
    }

    /// Run `f` in a new transaction, committing if it succeeds and rolling back if it fails.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or a failure to begin or commit the transaction.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut AnyConnection) -> BoxFuture<'c, Result<T>>,
    {
        run_in_transaction(&self.pool, f).await
    }
}
