use serde_json::Value;
use sky_manager_sqlparse::db::DbType;
use sqlx::{Any, AnyConnection, Executor, QueryBuilder, any::AnyQueryResult};

use super::{Condition, PushToQuery, QueryVariable, parse::ParseFromRow, push_where, select::Row};

fn push_columns<'a>(
    builder: &mut QueryBuilder<'_, Any>,
    columns: impl Iterator<Item = &'a str>,
) {
    columns.enumerate().for_each(|(i, e)| {
        if i > 0 {
            builder.push(", ");
        }
        builder.push(format_args!("\"{e}\""));
    });
}

/// `INSERT INTO table (columns...) VALUES (values...)`
pub struct Insert {
    table: String,
    values: Vec<(String, QueryVariable)>,
    backend: Option<DbType>,
}

impl Insert {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            values: vec![],
            backend: None,
        }
    }

    /// Render for `backend`, which matters for inserts without values.
    #[must_use]
    pub fn for_backend(mut self, backend: Option<DbType>) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn value(mut self, column: impl Into<String>, value: Value) -> Self {
        self.values.push((column.into(), QueryVariable(value)));
        self
    }

    #[must_use]
    pub fn values(mut self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.values
            .extend(values.into_iter().map(|(k, v)| (k, QueryVariable(v))));
        self
    }

    #[must_use]
    pub fn query(&self) -> String {
        super::render(self)
    }

    /// # Errors
    ///
    /// If the database rejects the statement.
    pub async fn execute(self, connection: &mut AnyConnection) -> Result<AnyQueryResult, sqlx::Error> {
        let backend = DbType::from_connection_string(connection.backend_name());

        let mut builder = QueryBuilder::new("");
        self.for_backend(backend).push_to(&mut builder);

        connection.execute(builder.build()).await
    }

    /// Execute the statement and return the primary key the store assigned to the new row, if the
    /// backend reports one.
    ///
    /// # Errors
    ///
    /// If the database rejects the statement.
    pub async fn execute_returning(
        self,
        connection: &mut AnyConnection,
        primary_key: &str,
    ) -> Result<Option<Value>, sqlx::Error> {
        let backend = DbType::from_connection_string(connection.backend_name());

        if !backend.as_ref().is_some_and(DbType::returns_inserted_keys) {
            let result = self.execute(connection).await?;
            return Ok(result.last_insert_id().map(Value::from));
        }

        let mut builder = QueryBuilder::new("");
        self.for_backend(backend).push_to(&mut builder);
        builder.push(format_args!(" RETURNING \"{primary_key}\""));

        let row = connection.fetch_one(builder.build()).await?;
        let mut row = <Row as ParseFromRow<Any>>::parse_from_row(&row)?;

        Ok(row.remove(primary_key).filter(|e| !e.is_null()))
    }
}

impl PushToQuery for Insert {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push(format_args!("INSERT INTO \"{}\"", self.table));

        if self.values.is_empty() {
            match self.backend {
                Some(DbType::MySql) => builder.push(" () VALUES ()"),
                _ => builder.push(" DEFAULT VALUES"),
            };
            return;
        }

        builder.push(" (");
        push_columns(builder, self.values.iter().map(|(k, _)| k.as_str()));
        builder.push(") VALUES (");
        self.values.iter().enumerate().for_each(|(i, (_, v))| {
            if i > 0 {
                builder.push(", ");
            }
            v.push_to(builder);
        });
        builder.push(")");
    }
}

/// `UPDATE table SET column = value, ... WHERE ...`
pub struct Update {
    table: String,
    assignments: Vec<(String, QueryVariable)>,
    conditions: Vec<Condition>,
}

impl Update {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: vec![],
            conditions: vec![],
        }
    }

    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: Value) -> Self {
        self.assignments.push((column.into(), QueryVariable(value)));
        self
    }

    /// Append a new `WHERE` condition using an `AND` statement as glue.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn query(&self) -> String {
        super::render(self)
    }

    /// Execute the statement, returning the number of affected rows. An update without
    /// assignments is not sent to the database at all.
    ///
    /// # Errors
    ///
    /// If the database rejects the statement.
    pub async fn execute(self, connection: &mut AnyConnection) -> Result<u64, sqlx::Error> {
        if self.assignments.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::new("");
        self.push_to(&mut builder);

        Ok(connection.execute(builder.build()).await?.rows_affected())
    }
}

impl PushToQuery for Update {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push(format_args!("UPDATE \"{}\" SET ", self.table));

        self.assignments.iter().enumerate().for_each(|(i, (k, v))| {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format_args!("\"{k}\" = "));
            v.push_to(builder);
        });

        push_where(builder, &self.conditions);
    }
}

/// `DELETE FROM table WHERE ...`
pub struct Delete {
    table: String,
    conditions: Vec<Condition>,
}

impl Delete {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: vec![],
        }
    }

    /// Append a new `WHERE` condition using an `AND` statement as glue.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn query(&self) -> String {
        super::render(self)
    }

    /// Execute the statement, returning the number of deleted rows.
    ///
    /// # Errors
    ///
    /// If the database rejects the statement.
    pub async fn execute(self, connection: &mut AnyConnection) -> Result<u64, sqlx::Error> {
        let mut builder = QueryBuilder::new("");
        self.push_to(&mut builder);

        Ok(connection.execute(builder.build()).await?.rows_affected())
    }
}

impl PushToQuery for Delete {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push(format_args!("DELETE FROM \"{}\"", self.table));
        push_where(builder, &self.conditions);
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use sky_manager_sqlparse::db::DbType;

    use super::{Delete, Insert, Update};
    use crate::entity::column::ColumnName;

    #[test]
    fn test_insert() {
        assert_eq!(
            Insert::new("cars")
                .value("quantity", json!(1))
                .value("color_id", json!(null))
                .query(),
            "INSERT INTO \"cars\" (\"quantity\", \"color_id\") VALUES (?, ?)"
        );
        assert_eq!(
            Insert::new("cars").query(),
            "INSERT INTO \"cars\" DEFAULT VALUES"
        );
    }

    #[test]
    fn test_insert_without_values() {
        assert_eq!(
            Insert::new("cars")
                .for_backend(DbType::from_connection_string("MySQL"))
                .query(),
            "INSERT INTO \"cars\" () VALUES ()"
        );
        assert_eq!(
            Insert::new("cars")
                .for_backend(DbType::from_connection_string("PostgreSQL"))
                .query(),
            "INSERT INTO \"cars\" DEFAULT VALUES"
        );
        // a backend only matters when there is nothing to insert
        assert_eq!(
            Insert::new("cars")
                .for_backend(Some(DbType::MySql))
                .value("quantity", json!(1))
                .query(),
            "INSERT INTO \"cars\" (\"quantity\") VALUES (?)"
        );
    }

    #[test]
    fn test_update() {
        assert_eq!(
            Update::new("cars")
                .set("quantity", json!(2))
                .set("color_id", json!(2))
                .filter(ColumnName::new_with_table_or_alias("cars", "id").eq(json!(1)))
                .query(),
            "UPDATE \"cars\" SET \"quantity\" = ?, \"color_id\" = ? WHERE (\"cars\".\"id\" = ?)"
        );
    }

    #[test]
    fn test_delete() {
        assert_eq!(
            Delete::new("cars_features")
                .filter(ColumnName::new_with_table_or_alias("cars_features", "car_id").eq(json!(1)))
                .filter(
                    ColumnName::new_with_table_or_alias("cars_features", "feature_id")
                        .is_in([json!(1), json!(2)])
                )
                .query(),
            "DELETE FROM \"cars_features\" WHERE (\"cars_features\".\"car_id\" = ?) AND \
             (\"cars_features\".\"feature_id\" IN (?, ?))"
        );
    }
}
