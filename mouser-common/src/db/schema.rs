//! Declarative schema definitions and schema verification
//!
//! Each table is described once, in code, through [`TableSchema`]. The same
//! description is used to create the table in a fresh experiment file and to
//! verify the table of an existing file.
//!
//! Unlike a migrating store, drift is never repaired: an experiment file
//! whose tables do not match is rejected with [`Error::Schema`] so the
//! caller can decide what to do with it.
//!
//! # Usage
//!
//! ```rust,ignore
//! pub struct AnimalsTable;
//!
//! impl TableSchema for AnimalsTable {
//!     fn table_name() -> &'static str { "animals" }
//!
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![
//!             ColumnDefinition::new("animal_id", "INTEGER").primary_key(),
//!             ColumnDefinition::new("rfid", "TEXT"),
//!         ]
//!     }
//! }
//!
//! SchemaVerifier::verify_table::<AnimalsTable>(&pool).await?;
//! ```

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::fmt;
use tracing::{debug, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// DEFAULT value (SQL literal)
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            default_value: None,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Set DEFAULT value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Column clause for CREATE TABLE
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    /// Table missing entirely
    MissingTable { table: String },
    /// Column missing from database
    MissingColumn { table: String, column: String },
    /// Column present in database but not in the definition
    UnexpectedColumn { table: String, column: String },
    /// Column type mismatch
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Constraint mismatch ("NOT NULL", "PRIMARY KEY")
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

impl fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDrift::MissingTable { table } => write!(f, "table '{}' is missing", table),
            SchemaDrift::MissingColumn { table, column } => {
                write!(f, "column {}.{} is missing", table, column)
            }
            SchemaDrift::UnexpectedColumn { table, column } => {
                write!(f, "column {}.{} is not part of the schema", table, column)
            }
            SchemaDrift::TypeMismatch {
                table,
                column,
                expected,
                actual,
            } => write!(
                f,
                "column {}.{} has type '{}', expected '{}'",
                table, column, actual, expected
            ),
            SchemaDrift::ConstraintMismatch {
                table,
                column,
                constraint,
            } => write!(f, "column {}.{} lacks {}", table, column, constraint),
        }
    }
}

/// Defines expected schema for a database table
pub trait TableSchema {
    /// Table name in database
    fn table_name() -> &'static str;

    /// Expected column definitions (order matters for table creation)
    fn expected_columns() -> Vec<ColumnDefinition>;

    /// Table-level constraints (CHECK, FOREIGN KEY) appended to CREATE TABLE
    fn table_constraints() -> Vec<&'static str> {
        Vec::new()
    }

    /// Index statements run after the table is created
    fn indexes() -> Vec<&'static str> {
        Vec::new()
    }

    /// CREATE TABLE statement built from the definitions above
    fn create_statement() -> String {
        let mut clauses: Vec<String> = Self::expected_columns()
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect();
        clauses.extend(Self::table_constraints().into_iter().map(str::to_string));
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            Self::table_name(),
            clauses.join(",\n    ")
        )
    }
}

/// Schema introspection via PRAGMA table_info
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from a table, in database order (by cid)
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Names of all user tables
    pub async fn user_tables(pool: &SqlitePool) -> Result<Vec<String>> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await?;

        Ok(tables)
    }
}

/// Drift detection between expected and actual columns
pub struct SchemaDiff;

impl SchemaDiff {
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            match actual.iter().find(|c| c.name == expected_col.name) {
                Some(actual_col) => {
                    if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            expected: expected_col.sql_type.clone(),
                            actual: actual_col.type_name.clone(),
                        });
                    }

                    if expected_col.not_null && !actual_col.not_null {
                        drift.push(SchemaDrift::ConstraintMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            constraint: "NOT NULL".to_string(),
                        });
                    }

                    if expected_col.primary_key && !actual_col.pk {
                        drift.push(SchemaDrift::ConstraintMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            constraint: "PRIMARY KEY".to_string(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                }),
            }
        }

        for actual_col in actual {
            if !expected.iter().any(|c| c.name == actual_col.name) {
                drift.push(SchemaDrift::UnexpectedColumn {
                    table: table_name.to_string(),
                    column: actual_col.name.clone(),
                });
            }
        }

        drift
    }

    /// Check if SQL types are compatible (SQLite type affinity rules)
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        if exp.contains("INT") && act.contains("INT") {
            return true;
        }

        if (exp.contains("TEXT") || exp.contains("CHAR") || exp.contains("CLOB"))
            && (act.contains("TEXT") || act.contains("CHAR") || act.contains("CLOB"))
        {
            return true;
        }

        if (exp.contains("REAL") || exp.contains("FLOAT") || exp.contains("DOUBLE"))
            && (act.contains("REAL") || act.contains("FLOAT") || act.contains("DOUBLE"))
        {
            return true;
        }

        false
    }
}

/// Verify tables against their definitions without modifying anything
pub struct SchemaVerifier;

impl SchemaVerifier {
    /// Collect drift for one table (a missing table is itself drift)
    pub async fn check_table<T: TableSchema>(pool: &SqlitePool) -> Result<Vec<SchemaDrift>> {
        let table_name = T::table_name();

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            return Ok(vec![SchemaDrift::MissingTable {
                table: table_name.to_string(),
            }]);
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        Ok(SchemaDiff::compare(table_name, &T::expected_columns(), &actual))
    }

    /// Fail with [`Error::Schema`] if the table drifted
    pub async fn verify_table<T: TableSchema>(pool: &SqlitePool) -> Result<()> {
        let drift = Self::check_table::<T>(pool).await?;

        if drift.is_empty() {
            debug!("Schema verified for '{}'", T::table_name());
            return Ok(());
        }

        for item in &drift {
            warn!("Schema drift: {}", item);
        }

        let summary: Vec<String> = drift.iter().map(ToString::to_string).collect();
        Err(Error::Schema(summary.join("; ")))
    }
}
