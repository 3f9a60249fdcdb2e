pub mod parse;
pub mod select;
pub mod write;

use std::{fmt::Display, ops::Deref};

use serde_json::Value;
use sqlx::{Any, QueryBuilder};

/// This trait represents anything that can be pushed into a [`QueryBuilder`], i.e. any kind of
/// query fragment, like a condition or a list of values.
pub trait PushToQuery {
    /// Push the object's contents into a query builder.
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>);
}

/// A type-erased `WHERE` condition.
pub type Condition = Box<dyn PushToQuery + Send + Sync>;

impl PushToQuery for Condition {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        self.deref().push_to(builder);
    }
}

/// A JSON value bound as a query parameter. Nested arrays and objects are bound as their JSON
/// text.
#[derive(Debug, Clone)]
pub struct QueryVariable(pub(crate) Value);

impl PushToQuery for QueryVariable {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        match &self.0 {
            Value::Null => {
                builder.push_bind(None::<String>);
            }
            Value::Bool(e) => {
                builder.push_bind(*e);
            }
            Value::Number(e) => {
                if let Some(int) = e.as_i64() {
                    builder.push_bind(int);
                } else if let Some(float) = e.as_f64() {
                    builder.push_bind(float);
                } else {
                    builder.push_bind(e.to_string());
                }
            }
            Value::String(e) => {
                builder.push_bind(e.clone());
            }
            e @ (Value::Array(_) | Value::Object(_)) => {
                builder.push_bind(e.to_string());
            }
        }
    }
}

impl PushToQuery for Vec<QueryVariable> {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push("(");
        self.iter().enumerate().for_each(|(i, e)| {
            if i > 0 {
                builder.push(", ");
            }
            e.push_to(builder);
        });
        builder.push(")");
    }
}

pub(crate) struct BracketsExpr<T: PushToQuery>(T);

impl<T: PushToQuery> BracketsExpr<T> {
    pub(crate) const fn new(inner: T) -> Self {
        Self(inner)
    }
}

impl<T: PushToQuery> PushToQuery for BracketsExpr<T> {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        builder.push("(");
        self.0.push_to(builder);
        builder.push(")");
    }
}

pub(crate) enum BinaryExprOperand {
    Equals,
    In,
}

impl Display for BinaryExprOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Equals => "=",
                Self::In => "IN",
            }
        )
    }
}

/// A binary SQL expression, glued together with an operator.
///
/// Example: `left-side [operator] right-side`
pub struct BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    a: T,
    b: C,
    operand: BinaryExprOperand,
}

impl<T, C> BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    pub(crate) const fn new(left: T, right: C, operand: BinaryExprOperand) -> Self {
        Self {
            a: left,
            b: right,
            operand,
        }
    }
}

impl<T, C> PushToQuery for BinaryExpr<T, C>
where
    T: PushToQuery,
    C: PushToQuery,
{
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        self.a.push_to(builder);
        builder.push(format_args!(" {} ", self.operand));
        self.b.push_to(builder);
    }
}

pub(crate) enum SingletonExprOperand {
    IsNull,
}

impl Display for SingletonExprOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::IsNull => "IS NULL",
            }
        )
    }
}

pub struct SingletonExpr<T>
where
    T: PushToQuery,
{
    inner: T,
    operand: SingletonExprOperand,
}

impl<T> SingletonExpr<T>
where
    T: PushToQuery,
{
    pub(crate) const fn new(inner: T, operand: SingletonExprOperand) -> Self {
        Self { inner, operand }
    }
}

impl<T> PushToQuery for SingletonExpr<T>
where
    T: PushToQuery,
{
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        self.inner.push_to(builder);
        builder.push(format_args!(" {}", self.operand));
    }
}

/// All `conditions`, each wrapped in `()` brackets and glued together with `AND`.
pub(crate) struct Conjunction<'a>(pub(crate) &'a [Condition]);

impl PushToQuery for Conjunction<'_> {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        self.0.iter().enumerate().for_each(|(i, e)| {
            if i > 0 {
                builder.push(" AND ");
            }
            BracketsExpr::new(e).push_to(builder);
        });
    }
}

impl<T: PushToQuery> PushToQuery for &T {
    fn push_to(&self, builder: &mut QueryBuilder<'_, Any>) {
        (*self).push_to(builder);
    }
}

/// Push ` WHERE ...` for `conditions`, or nothing if there are none.
pub(crate) fn push_where(builder: &mut QueryBuilder<'_, Any>, conditions: &[Condition]) {
    if !conditions.is_empty() {
        builder.push(" WHERE ");
        Conjunction(conditions).push_to(builder);
    }
}

/// Render `fragment` as backend-agnostic SQL, e.g. with `?` placeholders. Meant for debugging
/// and tests, not for running against a database.
pub(crate) fn render(fragment: &impl PushToQuery) -> String {
    let mut builder = QueryBuilder::<Any>::new("");
    fragment.push_to(&mut builder);
    builder.into_sql()
}
