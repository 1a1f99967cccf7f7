use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unsupported database engine: {0}")]
pub struct UnsupportedEngine(pub String);

/// The database engines this service can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Postgres,
    Mysql,
    Sqlite,
}

impl Engine {
    pub fn dialect(self) -> &'static dyn SqlDialect {
        match self {
            Engine::Postgres => &Postgres,
            Engine::Mysql => &Mysql,
            Engine::Sqlite => &Sqlite,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Postgres => "postgresql",
            Engine::Mysql => "mysql",
            Engine::Sqlite => "sqlite",
        }
    }
}

impl FromStr for Engine {
    type Err = UnsupportedEngine;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Engine::Postgres),
            "mysql" | "mariadb" => Ok(Engine::Mysql),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            _ => Err(UnsupportedEngine(value.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-engine SQL spelling. Query builders only ever go through this
/// interface and never branch on the engine themselves.
pub trait SqlDialect: Send + Sync {
    fn engine(&self) -> Engine;

    /// Placeholder for the 1-based bind parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn cast_date(&self, expr: &str) -> String;

    fn cast_text(&self, expr: &str) -> String;

    fn cast_bigint(&self, expr: &str) -> String;

    /// Wraps a placeholder that carries serialized JSON for a JSON column.
    fn json_value(&self, placeholder: &str) -> String {
        placeholder.to_string()
    }

    fn true_literal(&self) -> &'static str {
        "TRUE"
    }

    /// Statement that reads back the id of the last insert on the same
    /// connection. `None` means inserts can use `RETURNING`.
    fn last_insert_id_query(&self) -> Option<&'static str> {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Postgres;

#[derive(Debug, Clone, Copy)]
pub struct Mysql;

#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Postgres {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn cast_date(&self, expr: &str) -> String {
        format!("CAST({expr} AS DATE)")
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn cast_bigint(&self, expr: &str) -> String {
        format!("CAST({expr} AS BIGINT)")
    }

    fn json_value(&self, placeholder: &str) -> String {
        format!("CAST({placeholder} AS JSONB)")
    }
}

impl SqlDialect for Mysql {
    fn engine(&self) -> Engine {
        Engine::Mysql
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn cast_date(&self, expr: &str) -> String {
        format!("CAST({expr} AS DATE)")
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS CHAR)")
    }

    fn cast_bigint(&self, expr: &str) -> String {
        format!("CAST({expr} AS SIGNED)")
    }

    fn last_insert_id_query(&self) -> Option<&'static str> {
        Some("SELECT CAST(LAST_INSERT_ID() AS SIGNED) AS id")
    }
}

impl SqlDialect for Sqlite {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn cast_date(&self, expr: &str) -> String {
        format!("date({expr})")
    }

    fn cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn cast_bigint(&self, expr: &str) -> String {
        format!("CAST({expr} AS INTEGER)")
    }

    fn true_literal(&self) -> &'static str {
        "1"
    }
}
