//! A small car dealership database in memory, for exercising the manager against a real store.

use sky_manager::{
    EntityDeclaration, Manager, ManagerConfig, ModelRegistry, OrphanPolicy, RelationDeclaration,
    Result,
    sqlx::{self, any::AnyPoolOptions},
};
use sky_manager_sqlparse::schema::SqlSchema;

pub const SCHEMA: &str = "
CREATE TABLE makes (
  id INTEGER PRIMARY KEY,
  name TEXT
);
CREATE TABLE types (
  id INTEGER PRIMARY KEY,
  name TEXT
);
CREATE TABLE models (
  id INTEGER PRIMARY KEY,
  name TEXT,
  make_id INTEGER REFERENCES makes(id),
  type_id INTEGER REFERENCES types(id)
);
CREATE TABLE specs (
  id INTEGER PRIMARY KEY,
  name TEXT
);
CREATE TABLE models_specs (
  id INTEGER PRIMARY KEY,
  model_id INTEGER REFERENCES models(id),
  spec_id INTEGER REFERENCES specs(id)
);
CREATE TABLE colors (
  id INTEGER PRIMARY KEY,
  name TEXT
);
CREATE TABLE dealers (
  id INTEGER PRIMARY KEY,
  name TEXT,
  make_id INTEGER REFERENCES makes(id)
);
CREATE TABLE cars (
  id INTEGER PRIMARY KEY,
  quantity INTEGER NOT NULL DEFAULT 0,
  dealer_id INTEGER REFERENCES dealers(id),
  model_id INTEGER REFERENCES models(id),
  color_id INTEGER REFERENCES colors(id)
);
CREATE TABLE features (
  id INTEGER PRIMARY KEY,
  name TEXT UNIQUE
);
CREATE TABLE cars_features (
  id INTEGER PRIMARY KEY,
  car_id INTEGER REFERENCES cars(id),
  feature_id INTEGER REFERENCES features(id),
  package TEXT
);
CREATE TABLE warranties (
  id INTEGER PRIMARY KEY,
  years INTEGER NOT NULL,
  car_id INTEGER REFERENCES cars(id)
);
";

pub const FIXTURES: &str = "
INSERT INTO makes (id, name) VALUES (1, 'BMW');
INSERT INTO types (id, name) VALUES (1, 'Crossover');
INSERT INTO models (id, name, make_id, type_id) VALUES (1, 'X5', 1, 1);
INSERT INTO specs (id, name) VALUES (1, '4 door'), (2, 'xDrive');
INSERT INTO models_specs (model_id, spec_id) VALUES (1, 1), (1, 2);
INSERT INTO colors (id, name) VALUES (1, 'Grey'), (2, 'Black');
INSERT INTO dealers (id, name, make_id) VALUES (1, 'Houston BMW', 1);
INSERT INTO cars (id, quantity, dealer_id, model_id, color_id) VALUES (1, 1, 1, 1, 1);
INSERT INTO features (id, name) VALUES (1, 'GPS'), (2, 'Heated Seats'), (3, 'Sunroof');
INSERT INTO cars_features (car_id, feature_id, package) VALUES (1, 1, 'Tech'), (1, 2, 'Comfort');
INSERT INTO warranties (id, years, car_id) VALUES (1, 3, 1), (2, 5, 1);
";

/// Entity declarations for every table of [`SCHEMA`]. Columns are taken from the schema.
#[must_use]
pub fn declarations() -> Vec<EntityDeclaration> {
    vec![
        EntityDeclaration::new("make", "makes")
            .collection("makes")
            .relation(RelationDeclaration::has_many("models", "model"))
            .relation(RelationDeclaration::has_many("dealers", "dealer")),
        EntityDeclaration::new("type", "types").collection("types"),
        EntityDeclaration::new("model", "models")
            .collection("models")
            .relation(RelationDeclaration::belongs_to("make", "make"))
            .relation(RelationDeclaration::belongs_to("type", "type"))
            .relation(RelationDeclaration::belongs_to_many("specs", "spec")),
        EntityDeclaration::new("spec", "specs")
            .collection("specs")
            .relation(RelationDeclaration::belongs_to_many("models", "model")),
        EntityDeclaration::new("color", "colors").collection("colors"),
        EntityDeclaration::new("dealer", "dealers")
            .collection("dealers")
            .relation(RelationDeclaration::belongs_to("make", "make"))
            .relation(RelationDeclaration::has_many("cars", "car")),
        EntityDeclaration::new("car", "cars")
            .collection("cars")
            .relation(RelationDeclaration::belongs_to("dealer", "dealer"))
            .relation(RelationDeclaration::belongs_to("model", "model"))
            .relation(RelationDeclaration::belongs_to("color", "color"))
            .relation(
                RelationDeclaration::belongs_to_many("features", "feature").with_pivot(["package"]),
            )
            .relation(
                RelationDeclaration::has_many("warranties", "warranty")
                    .orphans(OrphanPolicy::Delete),
            ),
        EntityDeclaration::new("feature", "features")
            .collection("features")
            .relation(RelationDeclaration::belongs_to_many("cars", "car")),
        EntityDeclaration::new("warranty", "warranties").collection("warranties"),
    ]
}

fn statements(script: &'static str) -> impl Iterator<Item = &'static str> {
    script.split(';').map(str::trim).filter(|e| !e.is_empty())
}

/// Registry over [`declarations`], with columns taken from [`SCHEMA`].
///
/// # Errors
///
/// If the declarations do not match the schema.
pub fn registry() -> Result<ModelRegistry> {
    let schema = SqlSchema::parse(SCHEMA).map_err(|e| sky_manager::Error::Definition {
        entity: "*".to_string(),
        reason: e.to_string(),
    })?;

    ModelRegistry::builder()
        .schema(schema)
        .entities(declarations())
        .build()
}

/// A manager over a fresh in-memory database holding [`FIXTURES`].
pub struct Bootstrap {
    pub manager: Manager,
}

impl Bootstrap {
    /// # Errors
    ///
    /// If the database could not be set up.
    pub async fn new() -> Result<Self> {
        Self::with_config(ManagerConfig::default()).await
    }

    /// # Errors
    ///
    /// If the database could not be set up.
    pub async fn with_config(config: ManagerConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // every connection to `sqlite::memory:` opens its own database, so keep exactly one
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        for statement in statements(SCHEMA).chain(statements(FIXTURES)) {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self {
            manager: Manager::new(pool, registry()?).with_config(config),
        })
    }

    /// Number of rows in `table`.
    ///
    /// # Errors
    ///
    /// If the query fails.
    pub async fn count(&self, table: &str) -> Result<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM \"{table}\""))
                .fetch_one(self.manager.pool())
                .await?,
        )
    }

    /// Number of rows changed by writes since the database was opened.
    ///
    /// # Errors
    ///
    /// If the query fails.
    pub async fn changes(&self) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT total_changes()")
            .fetch_one(self.manager.pool())
            .await?)
    }
}
