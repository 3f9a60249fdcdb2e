use clap::Parser;
use eyre::Context;
use futures::StreamExt;
use sky_manager_sqlparse::{db::DbType, query::parse_tables, schema::SqlSchema};
use sqlx::{Connection, Row, SqliteConnection};
use tracing::info;

use crate::project::{Project, SCHEMA_FILE};

/// (Re-)Generate the database schema in JSON format, for filling in the columns of registered
/// entities
#[derive(Parser, Debug)]
pub struct GenerateSchema {
    #[command(flatten)]
    project: Project,
}

impl GenerateSchema {
    pub async fn run(&self) -> eyre::Result<()> {
        let database_url = self.project.database_url()?;

        let Some(database_type) = DbType::from_connection_string(&database_url) else {
            return Err(eyre::eyre!(
                "Failed to determine database type from connection string, ensure it starts with either `postgres`, `mysql`, or `sqlite`."
            ));
        };

        let schema = match database_type {
            DbType::Sqlite => generate_sqlite_schema(&database_url).await?,
            DbType::MySql | DbType::Postgres => {
                return Err(eyre::eyre!(
                    "Schema introspection is only supported for SQLite, list the columns in the registry instead."
                ));
            }
        };

        let project_dir = self.project.dir();
        let schema_file = project_dir.join(SCHEMA_FILE);

        tokio::fs::create_dir_all(project_dir)
            .await
            .context("Failed to create project directory")?;

        tokio::fs::write(
            &schema_file,
            serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?,
        )
        .await
        .context("Failed to write schema")?;

        info!(
            "Schema file with {} table(s) updated under {}",
            schema.tables.len(),
            schema_file.display()
        );

        Ok(())
    }
}

pub async fn generate_sqlite_schema(url: &str) -> eyre::Result<SqlSchema> {
    let mut conn = SqliteConnection::connect(url)
        .await
        .context("Failed to connect to database")?;

    let tables = sqlx::query("SELECT type,sql FROM sqlite_schema")
        .fetch(&mut conn)
        .filter_map(async |e| match e {
            Ok(e) => {
                let ty: String = e.get("type");
                if ty.eq("table") {
                    let sql: String = e.get("sql");

                    match parse_tables(&sql) {
                        Ok(t) => Some(Ok(t)),
                        Err(e) => Some(Err(eyre::eyre!("Failed to parse table SQL: {e}"))),
                    }
                } else {
                    None
                }
            }
            Err(e) => Some(Err(eyre::eyre!("Failed to execute DB query: {e}"))),
        })
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to gather tables")?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    Ok(SqlSchema { tables })
}
