use dotenvy::dotenv;

pub enum DbType {
    MySql,
    Postgres,
    Sqlite,
}

impl DbType {
    /// Detect the backend from a connection URL, or from a driver's backend name such as
    /// `PostgreSQL` or `SQLite`.
    #[must_use]
    pub fn from_connection_string(input: &str) -> Option<Self> {
        let lower = input.to_lowercase();

        if lower.starts_with("postgres") {
            Some(Self::Postgres)
        } else if lower.starts_with("sqlite") {
            Some(Self::Sqlite)
        } else if lower.starts_with("mysql") {
            Some(Self::MySql)
        } else {
            None
        }
    }

    /// Whether inserts on this backend report generated keys through `RETURNING` rather than a
    /// last-insert-id.
    #[must_use]
    pub const fn returns_inserted_keys(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

/// Attempt to retrieve the database URL from the `DATABASE_URL` environment variable, or from a
/// corresponding `.env` file. Values that are not valid UTF-8 are treated as missing.
#[must_use]
pub fn get_database_url() -> Option<String> {
    let _ = dotenv();

    std::env::var("DATABASE_URL").ok()
}
