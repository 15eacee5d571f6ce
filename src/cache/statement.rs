//! Parameterized statements for the scope stores.
//!
//! Column and table names come from `&'static str` constants; every value
//! travels as a bound parameter.

use sqlx::query::{Query, QueryAs, QueryScalar};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{FromRow, Sqlite};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    Int(i64),
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<&String> for Param {
    fn from(value: &String) -> Self {
        Param::Text(value.clone())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Vars,
    Objects,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Vars => "vars",
            Table::Objects => "objects",
        }
    }
}

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub(crate) fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for param in &self.params {
            query = match param {
                Param::Text(value) => query.bind(value.as_str()),
                Param::Int(value) => query.bind(*value),
            };
        }
        query
    }

    pub(crate) fn query_as<O>(&self) -> QueryAs<'_, Sqlite, O, SqliteArguments<'_>>
    where
        O: for<'r> FromRow<'r, SqliteRow>,
    {
        let mut query = sqlx::query_as::<Sqlite, O>(&self.sql);
        for param in &self.params {
            query = match param {
                Param::Text(value) => query.bind(value.as_str()),
                Param::Int(value) => query.bind(*value),
            };
        }
        query
    }

    pub(crate) fn query_scalar<O>(&self) -> QueryScalar<'_, Sqlite, O, SqliteArguments<'_>>
    where
        O: Send + Unpin,
        (O,): for<'r> FromRow<'r, SqliteRow>,
    {
        let mut query = sqlx::query_scalar::<Sqlite, O>(&self.sql);
        for param in &self.params {
            query = match param {
                Param::Text(value) => query.bind(value.as_str()),
                Param::Int(value) => query.bind(*value),
            };
        }
        query
    }
}

/// `WHERE` clause builder.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    clauses: Vec<String>,
    params: Vec<Param>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`
    pub fn eq(mut self, column: &'static str, value: impl Into<Param>) -> Self {
        self.clauses.push(format!("{column} = ?"));
        self.params.push(value.into());
        self
    }

    /// Case-sensitive prefix match on a text column.
    pub fn prefix(mut self, column: &'static str, prefix: &str) -> Self {
        let length = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
        self.clauses.push(format!("substr({column}, 1, ?) = ?"));
        self.params.push(Param::Int(length));
        self.params.push(Param::Text(prefix.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    fn finish(self, mut sql: String) -> Statement {
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        Statement {
            sql,
            params: self.params,
        }
    }

    pub fn delete_from(self, table: Table) -> Statement {
        self.finish(format!("DELETE FROM {}", table.as_str()))
    }

    pub fn count_in(self, table: Table) -> Statement {
        self.finish(format!("SELECT COUNT(*) FROM {}", table.as_str()))
    }

    pub fn select_from(self, table: Table, columns: &[&'static str]) -> Statement {
        self.finish(format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            table.as_str()
        ))
    }
}
