use serde_json::{Map, Number, Value};
use sqlx::{Column, Database, Row, any::AnyRow};

/// Trait describing a struct that may be parsed from a [`sqlx::Row`].
pub trait ParseFromRow<DB>: Sized
where
    DB: Database,
{
    fn parse_from_row(row: &<DB as Database>::Row) -> Result<Self, sqlx::Error>;
}

/// Decode the value at `index` as whichever JSON type the driver agrees to, `NULL` included.
fn decode_value(row: &AnyRow, index: usize) -> Result<Value, sqlx::Error> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::from));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::from));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::Bool));
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value.map_or(Value::Null, Value::String));
    }

    // blobs are the last resort, their error is the one worth reporting
    let value = row.try_get::<Option<Vec<u8>>, _>(index)?;
    Ok(value.map_or(Value::Null, |bytes| {
        Value::Array(bytes.into_iter().map(Value::from).collect())
    }))
}

impl ParseFromRow<sqlx::Any> for Map<String, Value> {
    fn parse_from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        row.columns()
            .iter()
            .map(|column| Ok((column.name().to_string(), decode_value(row, column.ordinal())?)))
            .collect()
    }
}
