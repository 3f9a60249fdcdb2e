use std::path::{Path, PathBuf};

use clap::Args;
use eyre::Context;
use serde::de::DeserializeOwned;
use sky_manager::{EntityDeclaration, Manager, ManagerConfig, ModelRegistry};
use sky_manager_sqlparse::{db::get_database_url, schema::SqlSchema};
use tracing::info;

pub const REGISTRY_FILE: &str = "registry.json";
pub const SCHEMA_FILE: &str = "schema.json";
pub const CONFIG_FILE: &str = "config.json";

/// Where to find the database and the project files describing it.
#[derive(Args, Debug)]
pub struct Project {
    /// The URL to the database. If left unset, will be pulled from the `DATABASE_URL`
    /// environment variable, or a corresponding `.env` file instead.
    #[arg(short, long, value_name = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory holding `registry.json`, and optionally `schema.json` and `config.json`.
    #[arg(long, value_name = "DIR", default_value = "sky_manager")]
    project_dir: PathBuf,
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> eyre::Result<Option<T>> {
    if !tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("Failed to access {}", path.display()))?
    {
        return Ok(None);
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))
        .map(Some)
}

impl Project {
    pub fn database_url(&self) -> eyre::Result<String> {
        self.database_url.clone().or_else(get_database_url).ok_or_else(|| {
            eyre::eyre!(
                "Missing database URL, either set the `DATABASE_URL` environment variable, or specify it manually via --database-url [URL]"
            )
        })
    }

    pub fn dir(&self) -> &Path {
        &self.project_dir
    }

    /// Build the registry from the project files and connect to the database.
    pub async fn manager(&self) -> eyre::Result<Manager> {
        let registry_file = self.project_dir.join(REGISTRY_FILE);

        let declarations: Vec<EntityDeclaration> = read_json(&registry_file)
            .await?
            .ok_or_else(|| eyre::eyre!("No registry found at {}", registry_file.display()))?;

        let mut builder = ModelRegistry::builder().entities(declarations);

        if let Some(schema) = read_json::<SqlSchema>(&self.project_dir.join(SCHEMA_FILE)).await? {
            info!("Using {} table(s) from {SCHEMA_FILE}", schema.tables.len());
            builder = builder.schema(schema);
        }

        let registry = builder.build().context("Failed to build registry")?;

        let config = read_json::<ManagerConfig>(&self.project_dir.join(CONFIG_FILE))
            .await?
            .unwrap_or_default();

        Ok(Manager::connect(&self.database_url()?, registry)
            .await
            .context("Failed to connect to database")?
            .with_config(config))
    }
}
