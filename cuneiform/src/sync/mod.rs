// Schema synchronizer: compare a model's declared table against the live
// one and reconcile.
//
// WARNING: in `SyncMode::Rebuild` (the default) any difference at all drops
// the table and recreates it, discarding every row it held. There is no
// column-level ALTER and no data migration.

use crate::error::Result;
use crate::registry::{FieldKind, Model, DEFAULT_TEXT_LENGTH};
use crate::storage::{ColumnSchema, Storage, TableSchema};
use serde::{Deserialize, Serialize};

/// How the synchronizer treats a table whose structure has drifted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Drop and recreate the table, discarding its rows.
    #[default]
    Rebuild,
    /// Leave the table alone and report the DDL that would fix it.
    Report,
}

/// A single structural difference between declared and live tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureChange {
    TableMissing {
        table: String,
    },
    ColumnAdded {
        table: String,
        column: String,
    },
    ColumnRemoved {
        table: String,
        column: String,
    },
    ColumnTypeChanged {
        table: String,
        column: String,
        from: String,
        to: String,
    },
    NullabilityChanged {
        table: String,
        column: String,
        not_null: bool,
    },
    PrimaryKeyChanged {
        table: String,
        column: String,
    },
    ForeignKeyChanged {
        table: String,
        column: String,
        from: Option<String>,
        to: Option<String>,
    },
    ColumnOrderChanged {
        table: String,
    },
}

impl StructureChange {
    /// Human-readable description of this change.
    pub fn describe(&self) -> String {
        match self {
            StructureChange::TableMissing { table } => {
                format!("Table '{}' does not exist", table)
            }
            StructureChange::ColumnAdded { table, column } => {
                format!("Column '{}.{}' added", table, column)
            }
            StructureChange::ColumnRemoved { table, column } => {
                format!("Column '{}.{}' removed", table, column)
            }
            StructureChange::ColumnTypeChanged {
                table,
                column,
                from,
                to,
            } => {
                format!("Column '{}.{}' type changed: {} -> {}", table, column, from, to)
            }
            StructureChange::NullabilityChanged {
                table,
                column,
                not_null,
            } => {
                let now = if *not_null { "NOT NULL" } else { "nullable" };
                format!("Column '{}.{}' is now {}", table, column, now)
            }
            StructureChange::PrimaryKeyChanged { table, column } => {
                format!("Primary key flag of '{}.{}' changed", table, column)
            }
            StructureChange::ForeignKeyChanged {
                table,
                column,
                from,
                to,
            } => format!(
                "Foreign key of '{}.{}' changed: {} -> {}",
                table,
                column,
                from.as_deref().unwrap_or("none"),
                to.as_deref().unwrap_or("none")
            ),
            StructureChange::ColumnOrderChanged { table } => {
                format!("Column order of '{}' changed", table)
            }
        }
    }
}

/// What the synchronizer did to one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Unchanged,
    Created,
    /// Dropped and recreated; existing rows are gone.
    Rebuilt,
    /// Drift detected in report mode; nothing was executed.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub model: String,
    pub table: String,
    pub action: SyncAction,
    pub changes: Vec<StructureChange>,
    /// DDL for manual review, set when `action` is `Pending`.
    pub script: Option<String>,
}

/// The table a model declares: identity, then one column per field.
pub fn declared_table(model: &Model) -> TableSchema {
    let mut columns = vec![ColumnSchema {
        name: model.identity().column.clone(),
        sql_type: "INTEGER".into(),
        not_null: false,
        primary_key: true,
        references: None,
    }];
    for field in model.fields() {
        let (sql_type, references) = match &field.kind {
            FieldKind::Integer => ("INTEGER".to_string(), None),
            FieldKind::Real => ("REAL".to_string(), None),
            FieldKind::Text { max_length, .. } => (
                format!("VARCHAR({})", max_length.unwrap_or(DEFAULT_TEXT_LENGTH)),
                None,
            ),
            FieldKind::Boolean => ("BOOLEAN".to_string(), None),
            FieldKind::Datetime => ("DATETIME".to_string(), None),
            FieldKind::Enum(_) => ("INTEGER".to_string(), None),
            FieldKind::Ref { target_table, .. } => {
                ("INTEGER".to_string(), Some(target_table.clone()))
            }
        };
        columns.push(ColumnSchema {
            name: field.column.clone(),
            sql_type,
            not_null: field.required,
            primary_key: false,
            references,
        });
    }
    TableSchema {
        name: model.table().to_string(),
        columns,
    }
}

/// Compare a declared table against the live one. Empty means identical.
pub fn diff_table(declared: &TableSchema, live: Option<&TableSchema>) -> Vec<StructureChange> {
    let table = declared.name.clone();
    let live = match live {
        Some(live) => live,
        None => return vec![StructureChange::TableMissing { table }],
    };

    let mut changes = Vec::new();

    for column in &declared.columns {
        let Some(existing) = live.column(&column.name) else {
            changes.push(StructureChange::ColumnAdded {
                table: table.clone(),
                column: column.name.clone(),
            });
            continue;
        };
        if !existing.sql_type.eq_ignore_ascii_case(&column.sql_type) {
            changes.push(StructureChange::ColumnTypeChanged {
                table: table.clone(),
                column: column.name.clone(),
                from: existing.sql_type.clone(),
                to: column.sql_type.clone(),
            });
        }
        if existing.not_null != column.not_null {
            changes.push(StructureChange::NullabilityChanged {
                table: table.clone(),
                column: column.name.clone(),
                not_null: column.not_null,
            });
        }
        if existing.primary_key != column.primary_key {
            changes.push(StructureChange::PrimaryKeyChanged {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
        if existing.references != column.references {
            changes.push(StructureChange::ForeignKeyChanged {
                table: table.clone(),
                column: column.name.clone(),
                from: existing.references.clone(),
                to: column.references.clone(),
            });
        }
    }

    for column in &live.columns {
        if declared.column(&column.name).is_none() {
            changes.push(StructureChange::ColumnRemoved {
                table: table.clone(),
                column: column.name.clone(),
            });
        }
    }

    if changes.is_empty() {
        let declared_order = declared.columns.iter().map(|c| &c.name);
        let live_order = live.columns.iter().map(|c| &c.name);
        if !declared_order.eq(live_order) {
            changes.push(StructureChange::ColumnOrderChanged { table });
        }
    }

    changes
}

/// Bring the storage structure of `model` in line with its declaration.
///
/// Storage failures propagate unchanged. Drift is not an error: in rebuild
/// mode it destroys the table's rows, in report mode it is only returned.
pub fn synchronize(storage: &dyn Storage, model: &Model, mode: SyncMode) -> Result<SyncReport> {
    let declared = declared_table(model);
    let live = storage.describe_table(&declared.name)?;
    let changes = diff_table(&declared, live.as_ref());

    let mut report = SyncReport {
        model: model.name().to_string(),
        table: declared.name.clone(),
        action: SyncAction::Unchanged,
        changes,
        script: None,
    };

    if report.changes.is_empty() {
        log::debug!("Table '{}' is up to date", declared.name);
        return Ok(report);
    }

    if live.is_none() {
        storage.create_table(&declared)?;
        log::info!("Created table '{}' for model {}", declared.name, model.name());
        report.action = SyncAction::Created;
        return Ok(report);
    }

    let summary: Vec<String> = report.changes.iter().map(|c| c.describe()).collect();
    match mode {
        SyncMode::Rebuild => {
            log::warn!(
                "Rebuilding table '{}', existing rows are discarded: {}",
                declared.name,
                summary.join("; ")
            );
            storage.drop_table(&declared.name)?;
            storage.create_table(&declared)?;
            report.action = SyncAction::Rebuilt;
        }
        SyncMode::Report => {
            log::warn!(
                "Table '{}' differs from model {} and was left untouched: {}",
                declared.name,
                model.name(),
                summary.join("; ")
            );
            report.action = SyncAction::Pending;
            report.script = Some(storage.rebuild_script(&declared));
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::schema::{FieldDefinition, ModelDefinition};
    use crate::storage::SqliteStorage;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn town(fields: Vec<FieldDefinition>) -> Model {
        let mut def = ModelDefinition::new("Town");
        def.fields = fields;
        let mut registry = Registry::new();
        (*registry.register_model(&def).unwrap()).clone()
    }

    fn columns(names: &[&str]) -> TableSchema {
        TableSchema {
            name: "town".into(),
            columns: names
                .iter()
                .map(|n| ColumnSchema {
                    name: n.to_string(),
                    sql_type: "INTEGER".into(),
                    not_null: false,
                    primary_key: *n == "id",
                    references: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_declared_table() {
        let mut registry = Registry::new();
        registry.register_model(&ModelDefinition::new("Address")).unwrap();
        let company = registry
            .register_model(
                &ModelDefinition::new("Company")
                    .field(FieldDefinition::text("name").required().max_length(80))
                    .field(FieldDefinition::boolean("active"))
                    .field(FieldDefinition::reference("addr", "Address")),
            )
            .unwrap();

        let table = declared_table(&company);
        assert_eq!(table.name, "company");
        let summary: Vec<(&str, &str, bool, Option<&str>)> = table
            .columns
            .iter()
            .map(|c| {
                (
                    c.name.as_str(),
                    c.sql_type.as_str(),
                    c.not_null,
                    c.references.as_deref(),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("id", "INTEGER", false, None),
                ("name", "VARCHAR(80)", true, None),
                ("active", "BOOLEAN", false, None),
                ("addr_id", "INTEGER", false, Some("address")),
            ]
        );
        assert!(table.columns[0].primary_key);
    }

    #[test]
    fn test_diff_no_changes() {
        let table = columns(&["id", "a"]);
        assert!(diff_table(&table, Some(&table)).is_empty());
    }

    #[test]
    fn test_diff_missing_table() {
        let table = columns(&["id"]);
        assert_eq!(
            diff_table(&table, None),
            vec![StructureChange::TableMissing {
                table: "town".into()
            }]
        );
    }

    #[test]
    fn test_diff_added_and_removed_columns() {
        let declared = columns(&["id", "a", "b"]);
        let live = columns(&["id", "a", "c"]);
        let diffs = diff_table(&declared, Some(&live));
        assert!(diffs.contains(&StructureChange::ColumnAdded {
            table: "town".into(),
            column: "b".into()
        }));
        assert!(diffs.contains(&StructureChange::ColumnRemoved {
            table: "town".into(),
            column: "c".into()
        }));
    }

    #[test]
    fn test_diff_type_and_nullability() {
        let declared = columns(&["id", "a"]);
        let mut live = declared.clone();
        live.columns[1].sql_type = "VARCHAR(255)".into();
        live.columns[1].not_null = true;
        let diffs = diff_table(&declared, Some(&live));
        assert_eq!(diffs.len(), 2);
        assert!(matches!(&diffs[0], StructureChange::ColumnTypeChanged { from, .. } if from == "VARCHAR(255)"));
        assert!(matches!(&diffs[1], StructureChange::NullabilityChanged { not_null: false, .. }));
    }

    #[test]
    fn test_diff_type_is_case_insensitive() {
        let declared = columns(&["id", "a"]);
        let mut live = declared.clone();
        live.columns[1].sql_type = "integer".into();
        assert!(diff_table(&declared, Some(&live)).is_empty());
    }

    #[test]
    fn test_diff_foreign_key() {
        let declared = columns(&["id", "a"]);
        let mut live = declared.clone();
        live.columns[1].references = Some("address".into());
        let diffs = diff_table(&declared, Some(&live));
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].describe().contains("address -> none"));
    }

    #[test]
    fn test_diff_column_order() {
        let declared = columns(&["id", "a", "b"]);
        let live = columns(&["id", "b", "a"]);
        assert_eq!(
            diff_table(&declared, Some(&live)),
            vec![StructureChange::ColumnOrderChanged {
                table: "town".into()
            }]
        );
    }

    #[test]
    fn test_synchronize_creates_then_is_idempotent() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let model = town(vec![FieldDefinition::text("name").required()]);

        let first = synchronize(&storage, &model, SyncMode::Rebuild).unwrap();
        assert_eq!(first.action, SyncAction::Created);

        let second = synchronize(&storage, &model, SyncMode::Rebuild).unwrap();
        assert_eq!(second.action, SyncAction::Unchanged);
        assert!(second.changes.is_empty());
    }

    #[test]
    fn test_synchronize_rebuild_discards_rows() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let old = town(vec![FieldDefinition::text("name")]);
        synchronize(&storage, &old, SyncMode::Rebuild).unwrap();
        storage
            .insert("town", &[("name".into(), Value::from("Karlsruhe"))])
            .unwrap();

        let new = town(vec![
            FieldDefinition::text("name"),
            FieldDefinition::integer("population"),
        ]);
        let report = synchronize(&storage, &new, SyncMode::Rebuild).unwrap();
        assert_eq!(report.action, SyncAction::Rebuilt);
        assert_eq!(
            report.changes,
            vec![StructureChange::ColumnAdded {
                table: "town".into(),
                column: "population".into()
            }]
        );

        let live = storage.describe_table("town").unwrap().unwrap();
        assert_eq!(live, declared_table(&new));
        let all = crate::storage::Query::new("town", vec!["id".into()]);
        assert_eq!(storage.count(&all).unwrap(), 0);
    }

    #[test]
    fn test_synchronize_report_mode_leaves_table() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let old = town(vec![FieldDefinition::text("name")]);
        synchronize(&storage, &old, SyncMode::Rebuild).unwrap();
        storage
            .insert("town", &[("name".into(), Value::from("Karlsruhe"))])
            .unwrap();

        let new = town(vec![FieldDefinition::text("name").max_length(40)]);
        let report = synchronize(&storage, &new, SyncMode::Report).unwrap();
        assert_eq!(report.action, SyncAction::Pending);
        let script = report.script.unwrap();
        assert!(script.contains("VARCHAR(40)"));

        // Nothing executed: old structure and row survive
        assert_eq!(storage.describe_table("town").unwrap().unwrap(), declared_table(&old));
        let all = crate::storage::Query::new("town", vec!["id".into()]);
        assert_eq!(storage.count(&all).unwrap(), 1);
    }

    #[test]
    fn test_sync_mode_deserializes() {
        let mode: SyncMode = serde_yaml::from_str("report").unwrap();
        assert_eq!(mode, SyncMode::Report);
        assert_eq!(SyncMode::default(), SyncMode::Rebuild);
    }
}
