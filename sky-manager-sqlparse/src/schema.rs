use serde::{Deserialize, Serialize};
use sqlparser::ast::{ColumnDef, ColumnOption, CreateTable, DataType, ObjectName, ObjectNamePart};

use crate::{ParserError, query::parse_tables};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SqlForeignKey {
    pub target_table: String,
    pub target_column: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SqlColumn {
    pub name: String,
    pub column_type: DataType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    #[serde(default)]
    pub has_default: bool,
    pub foreign_key: Option<SqlForeignKey>,
}

fn last_identifier(name: &ObjectName) -> Option<String> {
    name.0.last().map(|e| {
        let ObjectNamePart::Identifier(ident) = e;

        ident.value.clone()
    })
}

impl From<&ColumnDef> for SqlColumn {
    fn from(value: &ColumnDef) -> Self {
        let options = value.options.iter().map(|e| &e.option);

        let primary_key = options
            .clone()
            .any(|e| matches!(e, ColumnOption::Unique { is_primary: true, .. }));

        Self {
            name: value.name.value.clone(),
            column_type: value.data_type.clone(),
            // primary keys are implicitly `NOT NULL` as far as callers are concerned
            nullable: !primary_key
                && options
                    .clone()
                    .find_map(|e| match e {
                        ColumnOption::Null => Some(true),
                        ColumnOption::NotNull => Some(false),
                        _ => None,
                    })
                    .unwrap_or(true),
            unique: primary_key
                || options
                    .clone()
                    .any(|e| matches!(e, ColumnOption::Unique { .. })),
            primary_key,
            has_default: options
                .clone()
                .any(|e| matches!(e, ColumnOption::Default(_))),
            foreign_key: options.clone().find_map(|e| {
                let ColumnOption::ForeignKey {
                    foreign_table,
                    referred_columns,
                    ..
                } = e
                else {
                    return None;
                };

                Some(SqlForeignKey {
                    target_table: last_identifier(foreign_table)?,
                    // `REFERENCES makes` without a column list points at the primary key, which
                    // is `id` for every table this crate manages unless stated otherwise
                    target_column: match referred_columns.as_slice() {
                        [] => "id".to_string(),
                        [column] => column.value.clone(),
                        _ => return None,
                    },
                })
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SqlTable {
    pub name: String,
    pub columns: Vec<SqlColumn>,
    pub primary_key: Option<String>,
}

impl SqlTable {
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&SqlColumn> {
        self.columns.iter().find(|e| e.name.eq(name))
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|e| e.name.as_str())
    }

    /// Columns of this table holding a foreign key into `table`.
    pub fn references_to<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a SqlColumn> {
        self.columns.iter().filter(move |e| {
            e.foreign_key
                .as_ref()
                .is_some_and(|fk| fk.target_table.eq(table))
        })
    }
}

impl TryFrom<&CreateTable> for SqlTable {
    type Error = ParserError;

    fn try_from(create_table: &CreateTable) -> Result<Self, Self::Error> {
        let columns: Vec<SqlColumn> = create_table.columns.iter().map(SqlColumn::from).collect();

        let Some(name) = last_identifier(&create_table.name) else {
            return Err(ParserError::ParserError(
                "CREATE TABLE statement without a table name".to_string(),
            ));
        };

        Ok(Self {
            name,
            primary_key: columns
                .iter()
                .find_map(|e| {
                    if e.primary_key {
                        Some(e.name.clone())
                    } else {
                        None
                    }
                })
                .or(create_table.primary_key.as_ref().map(|e| e.to_string())),
            columns,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SqlSchema {
    pub tables: Vec<SqlTable>,
}

impl SqlSchema {
    /// Build a schema from a script of `CREATE TABLE` statements. Statements of any other kind
    /// are skipped.
    ///
    /// # Errors
    ///
    /// If the script is not valid SQLite syntax.
    pub fn parse(script: &str) -> Result<Self, ParserError> {
        Ok(Self {
            tables: parse_tables(script)?,
        })
    }

    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<&SqlTable> {
        self.tables.iter().find(|e| e.name.eq(name))
    }
}

#[cfg(test)]
mod test {
    use super::SqlSchema;

    const SCRIPT: &str = "
        CREATE TABLE makes (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE models (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL,
          make_id INTEGER REFERENCES makes(id),
          rank INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX models_make_id ON models (make_id);
    ";

    #[test]
    fn test_parse_schema() {
        let schema = SqlSchema::parse(SCRIPT).expect("Failed to parse schema");

        assert_eq!(schema.tables.len(), 2);

        let makes = schema.find_table("makes").expect("Missing makes table");
        assert_eq!(makes.primary_key.as_deref(), Some("id"));
        assert!(makes.find_column("name").is_some_and(|e| e.unique && !e.nullable));

        let models = schema.find_table("models").expect("Missing models table");
        assert_eq!(
            models.column_names().collect::<Vec<_>>(),
            vec!["id", "name", "make_id", "rank"]
        );
        assert!(models.find_column("rank").is_some_and(|e| e.has_default));
        assert_eq!(
            models
                .references_to("makes")
                .map(|e| e.name.as_str())
                .collect::<Vec<_>>(),
            vec!["make_id"]
        );
        assert!(models.find_column("id").is_some_and(|e| !e.nullable));
    }
}
