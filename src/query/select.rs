use serde_json::{Map, Value};
use sqlx::{Any, AnyConnection, Executor, QueryBuilder};

use crate::entity::{EntityDefinition, column::ColumnName};

use super::{Condition, PushToQuery, parse::ParseFromRow, push_where};

/// A row as returned by a [`Select`], keyed by column name.
pub type Row = Map<String, Value>;

pub struct Select {
    table: String,
    columns: Vec<ColumnName>,
    conditions: Vec<Condition>,
    order_by: Vec<ColumnName>,
    limit: Option<u64>,
}

impl Select {
    /// Select `columns` from `table`.
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let table = table.into();

        Self {
            columns: columns
                .into_iter()
                .map(|e| ColumnName::new_with_table_or_alias(&table, e))
                .collect(),
            table,
            conditions: vec![],
            order_by: vec![],
            limit: None,
        }
    }

    /// Select every column of `entity`.
    #[must_use]
    pub fn from_entity(entity: &EntityDefinition) -> Self {
        Self::new(entity.table(), entity.columns())
    }

    /// Append a new `WHERE` condition using an `AND` statement as glue. The passed condition is
    /// wrapped in `()` brackets.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: ColumnName) -> Self {
        self.order_by.push(column);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Return the raw SQL query of this statement. Note that the returned query is
    /// backend-agnostic, e.g. query parameters will be substituted with `?` instead of `$1` (in
    /// the case of postgres).
    ///
    /// This is mainly useful for debugging purposes, and not intended to produce queries to be run
    /// on an actual database.
    #[must_use]
    pub fn query(&self) -> String {
        super::render(self)
    }

    /// Execute the query, returning all results.
    ///
    /// # Errors
    ///
    /// If there's been a problem communicating with the database. See [`sqlx::Error`] for more
    /// information.
    pub async fn all(self, connection: &mut AnyConnection) -> Result<Vec<Row>, sqlx::Error> {
        let mut builder = QueryBuilder::new("");
        self.push_to(&mut builder);

        drop(self);

        connection
            .fetch_all(builder.build())
            .await?
            .iter()
            .map(<Row as ParseFromRow<Any>>::parse_from_row)
            .collect()
    }

    /// Execute the query, returning the first result if there is one.
    ///
    /// # Errors
    ///
    /// If there's been a problem communicating with the database.
    pub async fn optional(self, connection: &mut AnyConnection) -> Result<Option<Row>, sqlx::Error> {
        let mut builder = QueryBuilder::new("");
        self.limit(1).push_to(&mut builder);

        connection
            .fetch_optional(builder.build())
            .await?
            .as_ref()
            .map(<Row as ParseFromRow<Any>>::parse_from_row)
            .transpose()
    }

    /// Execute the query, returning a single result.
    ///
    /// # Errors
    ///
    /// If no entry could be found, or if there's been a problem communicating with the database.
    pub async fn one(self, connection: &mut AnyConnection) -> Result<Row, sqlx::Error> {
        self.optional(connection)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}

impl PushToQuery for Select {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push("SELECT ");

        self.columns.iter().enumerate().for_each(|(i, e)| {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format_args!("{e} AS \"{}\"", e.name()));
        });

        builder.push(format_args!(" FROM \"{}\"", self.table));

        push_where(builder, &self.conditions);

        if !self.order_by.is_empty() {
            builder.push(" ORDER BY ");
            self.order_by.iter().enumerate().for_each(|(i, e)| {
                if i > 0 {
                    builder.push(", ");
                }
                e.push_to(builder);
            });
        }

        if let Some(limit) = self.limit {
            builder.push(format_args!(" LIMIT {limit}"));
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::Select;
    use crate::entity::column::ColumnName;

    #[test]
    fn test_query() {
        let select = Select::new("cars", ["id", "quantity"])
            .filter(ColumnName::new_with_table_or_alias("cars", "dealer_id").eq(json!(1)))
            .filter(ColumnName::new_with_table_or_alias("cars", "color_id").eq(json!(null)))
            .order_by(ColumnName::new_with_table_or_alias("cars", "id"))
            .limit(10);

        assert_eq!(
            select.query(),
            "SELECT \"cars\".\"id\" AS \"id\", \"cars\".\"quantity\" AS \"quantity\" FROM \"cars\" \
             WHERE (\"cars\".\"dealer_id\" = ?) AND (\"cars\".\"color_id\" IS NULL) \
             ORDER BY \"cars\".\"id\" LIMIT 10"
        );
    }

    #[test]
    fn test_query_without_conditions() {
        assert_eq!(
            Select::new("makes", ["id"]).query(),
            "SELECT \"makes\".\"id\" AS \"id\" FROM \"makes\""
        );
    }
}
