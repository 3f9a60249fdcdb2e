use std::fmt::Display;

use serde_json::Value;
use sqlx::{Any, QueryBuilder};

use crate::query::{
    BinaryExpr, BinaryExprOperand, Condition, PushToQuery, QueryVariable, SingletonExpr,
    SingletonExprOperand,
};

#[derive(Debug, Clone)]
pub struct ColumnName {
    table_or_alias: Option<String>,
    column_name: String,
}

impl ColumnName {
    pub fn new(column_name: impl Into<String>) -> Self {
        Self {
            table_or_alias: None,
            column_name: column_name.into(),
        }
    }

    pub fn new_with_table_or_alias(
        table_or_alias: impl Into<String>,
        column_name: impl Into<String>,
    ) -> Self {
        Self {
            table_or_alias: Some(table_or_alias.into()),
            column_name: column_name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.column_name
    }

    /// `column = value`, or `column IS NULL` when `value` is `null`.
    #[must_use]
    pub fn eq(self, value: Value) -> Condition {
        if value.is_null() {
            self.is_null()
        } else {
            Box::new(BinaryExpr::new(
                self,
                QueryVariable(value),
                BinaryExprOperand::Equals,
            ))
        }
    }

    /// `column IN (values...)`. Callers must not pass an empty list, since not every backend
    /// accepts `IN ()`.
    #[must_use]
    pub fn is_in(self, values: impl IntoIterator<Item = Value>) -> Condition {
        Box::new(BinaryExpr::new(
            self,
            values.into_iter().map(QueryVariable).collect::<Vec<_>>(),
            BinaryExprOperand::In,
        ))
    }

    #[must_use]
    pub fn is_null(self) -> Condition {
        Box::new(SingletonExpr::new(self, SingletonExprOperand::IsNull))
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(table_or_alias) = &self.table_or_alias {
            write!(f, "\"{table_or_alias}\".")?;
        }
        write!(f, "\"{}\"", self.column_name)
    }
}

impl PushToQuery for ColumnName {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push(self.to_string());
    }
}
