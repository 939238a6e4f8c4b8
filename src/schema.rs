// 📐 Column Schema
// Per-dataset column type declarations shared by the row store and exporters

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue};

// ============================================================================
// COLUMN TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Real,
    Integer,
}

impl ColumnType {
    /// SQLite type affinity used in CREATE TABLE
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Integer => "INTEGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Header name, identical to the serde name of the record field
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn text(name: &'static str) -> Self {
        Column { name, column_type: ColumnType::Text, nullable: false }
    }

    pub const fn opt_text(name: &'static str) -> Self {
        Column { name, column_type: ColumnType::Text, nullable: true }
    }

    pub const fn real(name: &'static str) -> Self {
        Column { name, column_type: ColumnType::Real, nullable: true }
    }

    pub const fn integer(name: &'static str) -> Self {
        Column { name, column_type: ColumnType::Integer, nullable: true }
    }
}

// ============================================================================
// CELLS
// ============================================================================

/// One borrowed value of a record, tagged with its column type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Text(Option<&'a str>),
    Real(Option<f64>),
    Integer(Option<i64>),
}

impl ToSql for Cell<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match *self {
            Cell::Text(Some(s)) => return Ok(ToSqlOutput::from(s)),
            Cell::Real(Some(v)) => SqlValue::Real(v),
            Cell::Integer(Some(v)) => SqlValue::Integer(v),
            Cell::Text(None) | Cell::Real(None) | Cell::Integer(None) => SqlValue::Null,
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

/// A record type with a fixed, declared column layout.
///
/// `cells()` must yield one cell per entry of `columns()`, in the same order,
/// and the column names must match the record's serde field names so CSV
/// headers, SQLite columns and Parquet fields line up.
pub trait Tabular {
    fn columns() -> &'static [Column];
    fn cells(&self) -> Vec<Cell<'_>>;
}

/// CREATE TABLE statement for a record type
pub fn create_table_sql<T: Tabular>(table: &str) -> String {
    let columns: Vec<String> = T::columns()
        .iter()
        .map(|c| {
            let null = if c.nullable { "" } else { " NOT NULL" };
            format!("\"{}\" {}{}", c.name, c.column_type.sql_type(), null)
        })
        .collect();
    format!("CREATE TABLE \"{}\" ({})", table, columns.join(", "))
}

/// Quoted, comma separated column list for SELECT / INSERT
pub fn column_list<T: Tabular>() -> String {
    T::columns()
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}
