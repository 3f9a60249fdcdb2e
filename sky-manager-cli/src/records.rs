use std::io::Write;

use clap::Parser;
use eyre::Context;
use serde_json::Value;
use sky_manager::Options;
use tracing::info;

use crate::project::Project;

fn parse_json(input: &str, what: &str) -> eyre::Result<Value> {
    serde_json::from_str(input).with_context(|| format!("Failed to parse {what} as JSON"))
}

fn print_json(value: &Value, pretty: bool) -> eyre::Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("Failed to serialize result")?;

    writeln!(std::io::stdout().lock(), "{output}").context("Failed to write result")
}

/// Fetch records and print them as JSON
#[derive(Parser, Debug)]
pub struct Fetch {
    /// Entity name (first match) or collection name (all matches)
    name: String,

    /// JSON object of column values to match, e.g. `{"name": "BMW"}`
    #[arg(short, long)]
    criteria: Option<String>,

    /// Relation path to load along, e.g. `models.type`. May be given multiple times.
    #[arg(short, long = "with", value_name = "PATH")]
    with: Vec<String>,

    #[arg(long)]
    pretty: bool,

    #[command(flatten)]
    project: Project,
}

impl Fetch {
    pub async fn run(&self) -> eyre::Result<()> {
        let criteria = self
            .criteria
            .as_deref()
            .map(|e| parse_json(e, "criteria"))
            .transpose()?;
        let eager = self.with.iter().map(String::as_str).collect::<Vec<_>>();

        let manager = self.project.manager().await?;
        let fetched = manager
            .fetch(&self.name, criteria, &eager, Options::default())
            .await
            .with_context(|| format!("Failed to fetch `{}`", self.name))?;

        print_json(&fetched.to_json(), self.pretty)
    }
}

/// Save a nested patch and print the saved record as JSON
#[derive(Parser, Debug)]
pub struct Save {
    /// Entity name of the root record
    name: String,

    /// JSON object to save. Include the primary key to update an existing record.
    patch: String,

    #[arg(long)]
    pretty: bool,

    #[command(flatten)]
    project: Project,
}

impl Save {
    pub async fn run(&self) -> eyre::Result<()> {
        let patch = parse_json(&self.patch, "patch")?;

        let manager = self.project.manager().await?;
        let instance = manager.forge(&self.name)?;
        let saved = manager
            .save(instance, Some(patch), Options::default())
            .await
            .with_context(|| format!("Failed to save `{}`", self.name))?;

        if let Some(id) = saved.id() {
            info!("Saved `{}` {id}", self.name);
        }

        print_json(&saved.to_json(), self.pretty)
    }
}
