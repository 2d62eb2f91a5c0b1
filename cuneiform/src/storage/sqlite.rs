use super::{sql, ColumnSchema, Query, Row, Storage, TableSchema};
use crate::error::{OrmError, Result};
use crate::value::{format_datetime, Value};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

/// SQLite storage engine over a single rusqlite connection.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open or create the database file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Foreign keys are declared but not enforced: rebuilds drop and
    /// recreate referenced tables, and deletes leave referencing rows alone.
    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", false)?;
        Ok(SqliteStorage { conn })
    }

    fn execute(&self, stmt: &sql::Statement) -> Result<usize> {
        log::debug!("{} {:?}", stmt.sql, stmt.params);
        let changed = self
            .conn
            .execute(&stmt.sql, params_from_iter(stmt.params.iter().map(to_sql)))?;
        Ok(changed)
    }

    fn execute_ddl(&self, ddl: &str) -> Result<()> {
        log::debug!("{ddl}");
        self.conn.execute_batch(ddl)?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn describe_table(&self, table: &str) -> Result<Option<TableSchema>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let rows = stmt.query_map(params![table], |row| {
            Ok(ColumnSchema {
                name: row.get(0)?,
                sql_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
                references: None,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        if columns.is_empty() {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT \"from\", \"table\" FROM pragma_foreign_key_list(?1)")?;
        let keys = stmt.query_map(params![table], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for key in keys {
            let (from, target) = key?;
            if let Some(column) = columns.iter_mut().find(|c| c.name == from) {
                column.references = Some(target);
            }
        }

        Ok(Some(TableSchema {
            name: table.to_string(),
            columns,
        }))
    }

    fn create_table(&self, table: &TableSchema) -> Result<()> {
        self.execute_ddl(&sql::create_table(table))
    }

    fn drop_table(&self, table: &str) -> Result<()> {
        self.execute_ddl(&sql::drop_table(table))
    }

    fn rebuild_script(&self, table: &TableSchema) -> String {
        format!(
            "{};\n{};\n",
            sql::drop_table(&table.name),
            sql::create_table(table)
        )
    }

    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<i64> {
        self.execute(&sql::insert(table, values))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn update(&self, query: &Query, assignments: &[(String, Value)]) -> Result<usize> {
        if assignments.is_empty() {
            return Ok(0);
        }
        self.execute(&sql::update(query, assignments))
    }

    fn delete(&self, query: &Query) -> Result<usize> {
        self.execute(&sql::delete(query))
    }

    fn select(&self, query: &Query) -> Result<Vec<Row>> {
        let stmt = sql::select(query);
        log::debug!("{} {:?}", stmt.sql, stmt.params);
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let width = query.columns.len();
        let rows = prepared.query_map(params_from_iter(stmt.params.iter().map(to_sql)), |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<SqlValue>>>()
        })?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row?;
            let values = raw
                .into_iter()
                .zip(&query.columns)
                .map(|(value, column)| from_sql(value, &query.table, column))
                .collect::<Result<Row>>()?;
            out.push(values);
        }
        Ok(out)
    }

    fn count(&self, query: &Query) -> Result<u64> {
        let stmt = sql::count(query);
        log::debug!("{} {:?}", stmt.sql, stmt.params);
        let n: i64 = self.conn.query_row(
            &stmt.sql,
            params_from_iter(stmt.params.iter().map(to_sql)),
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }
}

/// Column representation of a value: booleans as 0/1, datetimes as RFC 3339
/// text, enums by code, references by identity.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(n) => SqlValue::Integer(*n),
        Value::Real(x) => SqlValue::Real(*x),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Datetime(dt) => SqlValue::Text(format_datetime(dt)),
        Value::Enum(e) => SqlValue::Integer(e.code),
        Value::Ref(r) => SqlValue::Integer(r.id),
    }
}

fn from_sql(value: SqlValue, table: &str, column: &str) -> Result<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(n) => Ok(Value::Integer(n)),
        SqlValue::Real(x) => Ok(Value::Real(x)),
        SqlValue::Text(s) => Ok(Value::Text(s)),
        SqlValue::Blob(_) => Err(OrmError::Decode {
            table: table.to_string(),
            column: column.to_string(),
            reason: "blob values are not supported".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{CompareOp, Column, Expr, Operand};
    use std::sync::Arc;

    fn town_table() -> TableSchema {
        TableSchema {
            name: "town".into(),
            columns: vec![
                ColumnSchema {
                    name: "id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    primary_key: true,
                    references: None,
                },
                ColumnSchema {
                    name: "name".into(),
                    sql_type: "VARCHAR(255)".into(),
                    not_null: true,
                    primary_key: false,
                    references: None,
                },
                ColumnSchema {
                    name: "twin_id".into(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    primary_key: false,
                    references: Some("town".into()),
                },
            ],
        }
    }

    fn name_is(name: &str) -> Arc<Expr> {
        Arc::new(Expr::Compare {
            column: Column {
                source: "town".into(),
                name: "name".into(),
                join: None,
            },
            op: CompareOp::Eq,
            operand: Operand::Value(Value::from(name)),
        })
    }

    fn query() -> Query {
        Query::new("town", vec!["id".into(), "name".into(), "twin_id".into()])
    }

    #[test]
    fn test_describe_round_trips_declared_structure() {
        let db = SqliteStorage::open_in_memory().unwrap();
        assert!(db.describe_table("town").unwrap().is_none());

        db.create_table(&town_table()).unwrap();
        let live = db.describe_table("town").unwrap().unwrap();
        assert_eq!(live, town_table());

        db.drop_table("town").unwrap();
        assert!(db.describe_table("town").unwrap().is_none());
        // Dropping again is a no-op
        db.drop_table("town").unwrap();
    }

    #[test]
    fn test_insert_select_count() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.create_table(&town_table()).unwrap();

        let ka = db
            .insert("town", &[("name".into(), Value::from("Karlsruhe"))])
            .unwrap();
        let s = db
            .insert("town", &[("name".into(), Value::from("Stuttgart"))])
            .unwrap();
        assert_ne!(ka, s);

        let rows = db.select(&query()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Value::Integer(ka), Value::from("Karlsruhe"), Value::Null]);
        assert_eq!(db.count(&query()).unwrap(), 2);

        let mut filtered = query();
        filtered.filter = Some(name_is("Stuttgart"));
        assert_eq!(db.count(&filtered).unwrap(), 1);
        assert_eq!(db.select(&filtered).unwrap()[0][0], Value::Integer(s));
    }

    #[test]
    fn test_update_and_delete() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.create_table(&town_table()).unwrap();
        db.insert("town", &[("name".into(), Value::from("Karlsruhe"))]).unwrap();
        db.insert("town", &[("name".into(), Value::from("Stuttgart"))]).unwrap();

        let mut q = query();
        q.filter = Some(name_is("Karlsruhe"));
        let changed = db
            .update(&q, &[("name".into(), Value::from("Durlach"))])
            .unwrap();
        assert_eq!(changed, 1);

        let mut q = query();
        q.filter = Some(name_is("Durlach"));
        assert_eq!(db.delete(&q).unwrap(), 1);
        // Deleting nothing is not an error
        assert_eq!(db.delete(&q).unwrap(), 0);
        assert_eq!(db.count(&query()).unwrap(), 1);
    }

    #[test]
    fn test_limit_applies_to_update_and_count() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.create_table(&town_table()).unwrap();
        for name in ["a", "b", "c"] {
            db.insert("town", &[("name".into(), Value::from(name))]).unwrap();
        }
        let mut q = query();
        q.limit = Some(2);
        assert_eq!(db.count(&q).unwrap(), 2);
        assert_eq!(db.update(&q, &[("name".into(), Value::from("x"))]).unwrap(), 2);

        q.limit = Some(0);
        assert_eq!(db.count(&q).unwrap(), 0);
        assert!(db.select(&q).unwrap().is_empty());
    }

    #[test]
    fn test_storage_errors_propagate() {
        let db = SqliteStorage::open_in_memory().unwrap();
        let result = db.insert("missing", &[("name".into(), Value::from("x"))]);
        assert!(matches!(result, Err(OrmError::Storage(_))));

        db.create_table(&town_table()).unwrap();
        let result = db.insert("town", &[("name".into(), Value::Null)]);
        assert!(matches!(result, Err(OrmError::Storage(_))));
    }

    #[test]
    fn test_foreign_keys_not_enforced() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.create_table(&town_table()).unwrap();
        let ka = db.insert("town", &[("name".into(), Value::from("Karlsruhe"))]).unwrap();
        db.insert(
            "town",
            &[
                ("name".into(), Value::from("Durlach")),
                ("twin_id".into(), Value::Integer(ka)),
            ],
        )
        .unwrap();

        let mut q = query();
        q.filter = Some(name_is("Karlsruhe"));
        assert_eq!(db.delete(&q).unwrap(), 1);
        db.drop_table("town").unwrap();
    }

    #[test]
    fn test_rebuild_script() {
        let db = SqliteStorage::open_in_memory().unwrap();
        let script = db.rebuild_script(&town_table());
        assert!(script.starts_with("DROP TABLE IF EXISTS \"town\";\nCREATE TABLE \"town\" ("));
    }
}
