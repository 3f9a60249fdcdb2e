use sqlparser::{
    ast::Statement,
    dialect::SQLiteDialect,
    parser::{Parser, ParserError},
};

use crate::schema::SqlTable;

/// Parse every `CREATE TABLE` statement contained in `query`, in order of appearance.
///
/// # Errors
///
/// If `query` is not valid SQLite syntax.
pub fn parse_tables(query: &str) -> Result<Vec<SqlTable>, ParserError> {
    Parser::parse_sql(&SQLiteDialect {}, query)?
        .iter()
        .filter_map(|e| {
            if let Statement::CreateTable(statement) = e {
                Some(SqlTable::try_from(statement))
            } else {
                None
            }
        })
        .collect()
}

/// Parse the first `CREATE TABLE` statement contained in `query`.
///
/// # Errors
///
/// If `query` is not valid SQLite syntax, or does not contain a `CREATE TABLE` statement.
pub fn parse_create_table(query: &str) -> Result<SqlTable, ParserError> {
    parse_tables(query)?
        .into_iter()
        .next()
        .ok_or_else(|| ParserError::ParserError("No CREATE TABLE statement found".to_string()))
}
