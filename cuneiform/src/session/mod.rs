use crate::error::{OrmError, Result};
use crate::expr::{Expr, FieldRef, OrderBy};
use crate::instance::RecordBuilder;
use crate::recordset::RecordSet;
use crate::registry::{EnumType, FieldKind, Model, Registry};
use crate::schema::{parse_schema, EnumDefinition, ModelDefinition, SchemaDefinition};
use crate::storage::{SqliteStorage, Storage};
use crate::sync::{synchronize, SyncMode, SyncReport};
use crate::value::EnumValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Session-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub sync_mode: SyncMode,
}

/// The main entry point: one storage engine plus the registry of models
/// declared against it.
///
/// Registration takes `&mut self`; everything else borrows the session
/// shared, so records and record sets cannot outlive it.
pub struct Session {
    registry: Registry,
    storage: Box<dyn Storage>,
    options: SessionOptions,
    reports: Vec<SyncReport>,
}

impl Session {
    pub fn new(storage: impl Storage + 'static, options: SessionOptions) -> Self {
        Session {
            registry: Registry::new(),
            storage: Box::new(storage),
            options,
            reports: Vec::new(),
        }
    }

    /// Open a session over the SQLite file at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let storage = SqliteStorage::open(path.as_ref())?;
        log::info!("Opened database {}", path.as_ref().display());
        Ok(Session::new(storage, SessionOptions::default()))
    }

    /// Open a session over an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Session::new(
            SqliteStorage::open_in_memory()?,
            SessionOptions::default(),
        ))
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    // ── Registration ───────────────────────────────────────────────

    pub fn register_enum(&mut self, def: &EnumDefinition) -> Result<Arc<EnumType>> {
        self.registry.register_enum(def)
    }

    /// Register a model and synchronize its table.
    ///
    /// WARNING: with the default `SyncMode::Rebuild`, a table whose
    /// structure differs from the declaration is dropped and recreated and
    /// its rows are lost. The model only becomes visible once its table is
    /// in place; a failed synchronization leaves the registry unchanged.
    pub fn register(&mut self, def: &ModelDefinition) -> Result<Arc<Model>> {
        let (model, relations) = self.registry.prepare(def)?;
        let report = synchronize(self.storage.as_ref(), &model, self.options.sync_mode)?;
        self.reports.push(report);
        Ok(self.registry.commit(model, relations))
    }

    /// Register every enumeration, then every model, in declaration order.
    pub fn register_schema(&mut self, schema: &SchemaDefinition) -> Result<()> {
        for def in &schema.enums {
            self.register_enum(def)?;
        }
        for def in &schema.models {
            self.register(def)?;
        }
        Ok(())
    }

    /// Parse a YAML schema file and register its contents.
    pub fn register_schema_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let schema = parse_schema(path.as_ref())?;
        self.register_schema(&schema)
    }

    /// Reports of every synchronization run so far, oldest first.
    pub fn sync_reports(&self) -> &[SyncReport] {
        &self.reports
    }

    /// Synchronize the tables of every registered model again.
    pub fn sync_all(&mut self) -> Result<Vec<SyncReport>> {
        let mut reports = Vec::new();
        for model in self.registry.models() {
            reports.push(synchronize(
                self.storage.as_ref(),
                model,
                self.options.sync_mode,
            )?);
        }
        self.reports.extend(reports.iter().cloned());
        Ok(reports)
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.registry.model(name)
    }

    pub fn enum_value(&self, enumeration: &str, symbol: &str) -> Result<EnumValue> {
        self.registry.enumeration(enumeration)?.value(symbol)
    }

    /// Handle on field `name` of `model`, for building filters and orderings.
    pub fn field(&self, model: &str, name: &str) -> Result<FieldRef> {
        Ok(FieldRef::new(self.model(model)?.field(name)?))
    }

    /// `target_field` of the row reference field `model.via` points at,
    /// e.g. `follow("Company", "addr", "town")`.
    pub fn follow(&self, model: &str, via: &str, target_field: &str) -> Result<FieldRef> {
        let model = self.model(model)?;
        let via = model.field(via)?;
        let FieldKind::Ref { target, .. } = &via.kind else {
            return Err(OrmError::type_mismatch(
                model.name(),
                &via.name,
                "ref",
                via.kind.name(),
            ));
        };
        let target = self.model(target)?;
        FieldRef::follow(via, target.field(target_field)?)
    }

    /// `source_field` of the rows reverse accessor `model.accessor` yields,
    /// e.g. `reverse("Address", "companies", "name")`.
    pub fn reverse(&self, model: &str, accessor: &str, source_field: &str) -> Result<FieldRef> {
        let model = self.model(model)?;
        let relation = self.registry.relation(model.name(), accessor)?;
        let source = self.model(&relation.source)?;
        FieldRef::reverse(&model, relation, source.field(source_field)?)
    }

    // ── Records ────────────────────────────────────────────────────

    /// Every row of `model`, not yet materialized.
    pub fn select(&self, model: &str) -> Result<RecordSet<'_>> {
        Ok(RecordSet::new(self, self.model(model)?))
    }

    /// `select` with the optional filter, ordering and limit applied at once.
    pub fn select_with(
        &self,
        model: &str,
        filter: Option<Expr>,
        order_by: Option<OrderBy>,
        limit: Option<i64>,
    ) -> Result<RecordSet<'_>> {
        let mut set = self.select(model)?;
        if let Some(filter) = filter {
            set = set.filter(filter)?;
        }
        if let Some(order_by) = order_by {
            set = set.order_by(order_by)?;
        }
        if let Some(limit) = limit {
            set = set.limit(limit)?;
        }
        Ok(set)
    }

    /// Start a new, unsaved record of `model`.
    pub fn new_record(&self, model: &str) -> Result<RecordBuilder<'_>> {
        Ok(RecordBuilder::new(self, self.model(model)?))
    }
}
