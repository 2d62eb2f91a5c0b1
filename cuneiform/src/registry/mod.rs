// Model registry: validated model definitions, enumerations and the
// relations inferred between models.

pub mod naming;

use crate::error::{OrmError, Result};
use crate::schema::{EnumDefinition, FieldDefinition, FieldType, ModelDefinition};
use crate::value::{EnumValue, RefValue, Value};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Name of the implicit identity field and column of every model.
pub const IDENTITY: &str = "id";

/// Default `VARCHAR` width of text columns without `max_length`.
pub const DEFAULT_TEXT_LENGTH: usize = 255;

/// A registered enumeration: symbols ordered by their explicit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    name: String,
    symbols: Vec<(String, i64)>,
}

impl EnumType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbols in code order.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, i64)> {
        self.symbols.iter().map(|(s, c)| (s.as_str(), *c))
    }

    pub fn value(&self, symbol: &str) -> Result<EnumValue> {
        self.symbols
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(s, code)| self.make(s, *code))
            .ok_or_else(|| {
                OrmError::Validation(format!(
                    "'{symbol}' is not a symbol of enumeration {}",
                    self.name
                ))
            })
    }

    pub fn from_code(&self, code: i64) -> Option<EnumValue> {
        self.symbols
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(s, c)| self.make(s, *c))
    }

    fn contains(&self, value: &EnumValue) -> bool {
        value.enumeration == self.name
            && self
                .symbols
                .iter()
                .any(|(s, c)| *s == value.symbol && *c == value.code)
    }

    fn make(&self, symbol: &str, code: i64) -> EnumValue {
        EnumValue {
            enumeration: self.name.clone(),
            symbol: symbol.to_string(),
            code,
        }
    }
}

/// Semantic type of a registered field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer,
    Real,
    Text {
        min_length: Option<usize>,
        max_length: Option<usize>,
    },
    Boolean,
    Datetime,
    Enum(Arc<EnumType>),
    Ref {
        target: String,
        target_table: String,
    },
}

impl FieldKind {
    /// Name of the semantic type, comparable with [`Value::kind`].
    pub fn name(&self) -> String {
        match self {
            FieldKind::Integer => "integer".into(),
            FieldKind::Real => "real".into(),
            FieldKind::Text { .. } => "text".into(),
            FieldKind::Boolean => "boolean".into(),
            FieldKind::Datetime => "datetime".into(),
            FieldKind::Enum(e) => format!("enum {}", e.name),
            FieldKind::Ref { target, .. } => format!("ref {target}"),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Integer, Value::Integer(_))
            | (FieldKind::Real, Value::Real(_))
            | (FieldKind::Text { .. }, Value::Text(_))
            | (FieldKind::Boolean, Value::Boolean(_))
            | (FieldKind::Datetime, Value::Datetime(_)) => true,
            (FieldKind::Enum(e), Value::Enum(v)) => v.enumeration == e.name,
            (FieldKind::Ref { target, .. }, Value::Ref(r)) => r.model == *target,
            _ => false,
        }
    }
}

/// A field descriptor bound to a registered model.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub model: String,
    pub table: String,
    pub column: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
}

impl Field {
    fn identity(model: &str, table: &str) -> Self {
        Field {
            name: IDENTITY.into(),
            model: model.to_string(),
            table: table.to_string(),
            column: IDENTITY.into(),
            kind: FieldKind::Integer,
            required: true,
            default: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.name == IDENTITY
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Ref { .. })
    }

    /// Fails with `TypeMismatch` when a non-null value has another semantic type.
    pub fn check_kind(&self, value: &Value) -> Result<()> {
        if value.is_null() || self.kind.matches(value) {
            Ok(())
        } else {
            Err(OrmError::type_mismatch(
                &self.model,
                &self.name,
                self.kind.name(),
                value.kind(),
            ))
        }
    }

    /// Full assignment check: semantic type, nullability, text length and
    /// enumeration domain.
    pub fn check(&self, value: &Value) -> Result<()> {
        self.check_kind(value)?;
        match (&self.kind, value) {
            (_, Value::Null) if self.required => Err(OrmError::Validation(format!(
                "{}.{} is required and cannot be null",
                self.model, self.name
            ))),
            (FieldKind::Text { min_length, max_length }, Value::Text(s)) => {
                let len = s.chars().count();
                if min_length.map_or(false, |min| len < min) {
                    return Err(OrmError::Validation(format!(
                        "{}.{} is {len} characters, shorter than {}",
                        self.model,
                        self.name,
                        min_length.unwrap_or_default()
                    )));
                }
                if len > max_length.unwrap_or(DEFAULT_TEXT_LENGTH) {
                    return Err(OrmError::Validation(format!(
                        "{}.{} is {len} characters, longer than {}",
                        self.model,
                        self.name,
                        max_length.unwrap_or(DEFAULT_TEXT_LENGTH)
                    )));
                }
                Ok(())
            }
            (FieldKind::Enum(e), Value::Enum(v)) if !e.contains(v) => {
                Err(OrmError::Validation(format!(
                    "{} (code {}) is not a member of {}",
                    v, v.code, e.name
                )))
            }
            _ => Ok(()),
        }
    }

    /// Turn a raw storage value (null, integer, real or text) into the
    /// field's semantic value.
    pub fn decode(&self, raw: Value) -> Result<Value> {
        let decoded = match (&self.kind, raw) {
            (_, Value::Null) => Some(Value::Null),
            (FieldKind::Integer, Value::Integer(n)) => Some(Value::Integer(n)),
            (FieldKind::Real, Value::Real(x)) => Some(Value::Real(x)),
            (FieldKind::Real, Value::Integer(n)) => Some(Value::Real(n as f64)),
            (FieldKind::Text { .. }, Value::Text(s)) => Some(Value::Text(s)),
            (FieldKind::Boolean, Value::Integer(n)) => Some(Value::Boolean(n != 0)),
            (FieldKind::Datetime, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| Value::Datetime(dt.with_timezone(&Utc))),
            (FieldKind::Enum(e), Value::Integer(code)) => e.from_code(code).map(Value::Enum),
            (FieldKind::Ref { target, .. }, Value::Integer(id)) => Some(Value::Ref(RefValue {
                model: target.clone(),
                id,
            })),
            (_, other) => {
                return Err(self.decode_error(format!("unexpected stored {}", other.kind())))
            }
        };
        decoded.ok_or_else(|| self.decode_error(format!("stored value is not a valid {}", self.kind.name())))
    }

    fn decode_error(&self, reason: String) -> OrmError {
        OrmError::Decode {
            table: self.table.clone(),
            column: self.column.clone(),
            reason,
        }
    }
}

/// A registered model definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    name: String,
    table: String,
    identity: Field,
    fields: Vec<Field>,
}

impl Model {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity(&self) -> &Field {
        &self.identity
    }

    /// Declared fields in declaration order, without the identity.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Look up a declared field or the identity by name.
    pub fn field(&self, name: &str) -> Result<&Field> {
        if name == IDENTITY {
            return Ok(&self.identity);
        }
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| OrmError::unknown_field(&self.name, name))
    }

    pub(crate) fn position(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| OrmError::unknown_field(&self.name, name))
    }

    /// Storage columns in order: identity first, then one per field.
    pub fn columns(&self) -> Vec<String> {
        std::iter::once(self.identity.column.clone())
            .chain(self.fields.iter().map(|f| f.column.clone()))
            .collect()
    }

    pub fn references(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_reference())
    }
}

/// A relation inferred from a reference field: `source.field` points at
/// `target`, and `target` gains the RecordSet accessor `accessor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub source: String,
    pub field: String,
    pub column: String,
    pub target: String,
    pub accessor: String,
}

/// The set of declared enumerations, models and relations of one session.
#[derive(Debug, Default)]
pub struct Registry {
    enums: HashMap<String, Arc<EnumType>>,
    models: Vec<Arc<Model>>,
    relations: Vec<Relation>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_enum(&mut self, def: &EnumDefinition) -> Result<Arc<EnumType>> {
        ensure_identifier("enumeration", &def.name)?;
        if self.enums.contains_key(&def.name) {
            return Err(OrmError::Schema(format!(
                "enumeration '{}' is already registered",
                def.name
            )));
        }
        if def.symbols.is_empty() {
            return Err(OrmError::Schema(format!(
                "enumeration '{}' declares no symbols",
                def.name
            )));
        }

        let mut codes = HashSet::new();
        for (symbol, code) in &def.symbols {
            ensure_identifier("enumeration symbol", symbol)?;
            if !codes.insert(*code) {
                return Err(OrmError::Schema(format!(
                    "enumeration '{}' uses code {code} more than once",
                    def.name
                )));
            }
        }

        let mut symbols: Vec<(String, i64)> = def
            .symbols
            .iter()
            .map(|(s, c)| (s.clone(), *c))
            .collect();
        symbols.sort_by_key(|(_, code)| *code);

        let enum_type = Arc::new(EnumType {
            name: def.name.clone(),
            symbols,
        });
        self.enums.insert(def.name.clone(), enum_type.clone());
        log::info!("Registered enumeration {}", def.name);
        Ok(enum_type)
    }

    /// Validate a model declaration and infer its relations.
    pub fn register_model(&mut self, def: &ModelDefinition) -> Result<Arc<Model>> {
        let (model, relations) = self.prepare(def)?;
        Ok(self.commit(model, relations))
    }

    /// Everything registration does except recording the result, so the
    /// caller can synchronize storage before the model becomes visible.
    pub(crate) fn prepare(&self, def: &ModelDefinition) -> Result<(Model, Vec<Relation>)> {
        ensure_identifier("model", &def.name)?;
        if self.find(&def.name).is_some() {
            return Err(OrmError::Schema(format!(
                "model '{}' is already registered",
                def.name
            )));
        }
        let table = naming::table_name(&def.name);
        if let Some(other) = self.models.iter().find(|m| m.table == table) {
            return Err(OrmError::Schema(format!(
                "model '{}' would share table '{table}' with model '{}'",
                def.name, other.name
            )));
        }

        let mut fields: Vec<Field> = Vec::with_capacity(def.fields.len());
        let mut columns: HashSet<String> = HashSet::from([IDENTITY.to_string()]);
        for field_def in &def.fields {
            ensure_identifier("field", &field_def.name)?;
            if field_def.name == IDENTITY {
                return Err(OrmError::Schema(format!(
                    "model '{}' cannot declare '{IDENTITY}': the identity field is implicit",
                    def.name
                )));
            }
            if fields.iter().any(|f| f.name == field_def.name) {
                return Err(OrmError::Schema(format!(
                    "model '{}' declares field '{}' twice",
                    def.name, field_def.name
                )));
            }

            let field = self.build_field(&def.name, &table, field_def)?;
            if !columns.insert(field.column.clone()) {
                return Err(OrmError::Schema(format!(
                    "column '{}' of model '{}' is produced by more than one field",
                    field.column, def.name
                )));
            }
            fields.push(field);
        }

        let model = Model {
            identity: Field::identity(&def.name, &table),
            name: def.name.clone(),
            table,
            fields,
        };
        let relations = self.infer_relations(&model)?;
        Ok((model, relations))
    }

    pub(crate) fn commit(&mut self, model: Model, relations: Vec<Relation>) -> Arc<Model> {
        for relation in &relations {
            log::info!(
                "Inferred relation {}.{} -> {} (reverse accessor {}.{})",
                relation.source,
                relation.field,
                relation.target,
                relation.target,
                relation.accessor
            );
        }
        self.relations.extend(relations);
        let model = Arc::new(model);
        self.models.push(model.clone());
        log::info!("Registered model {} (table {})", model.name, model.table);
        model
    }

    fn build_field(&self, model: &str, table: &str, def: &FieldDefinition) -> Result<Field> {
        let target = || {
            def.target.clone().ok_or_else(|| {
                OrmError::Schema(format!("field '{model}.{}' needs a target", def.name))
            })
        };
        let kind = match def.field_type {
            FieldType::Integer => FieldKind::Integer,
            FieldType::Real => FieldKind::Real,
            FieldType::Boolean => FieldKind::Boolean,
            FieldType::Datetime => FieldKind::Datetime,
            FieldType::Text => {
                if let (Some(min), Some(max)) = (def.min_length, def.max_length) {
                    if min > max {
                        return Err(OrmError::Schema(format!(
                            "field '{model}.{}' has min_length {min} above max_length {max}",
                            def.name
                        )));
                    }
                }
                FieldKind::Text {
                    min_length: def.min_length,
                    max_length: def.max_length,
                }
            }
            FieldType::Enum => {
                let name = target()?;
                let enum_type = self.enums.get(&name).cloned().ok_or_else(|| {
                    OrmError::Schema(format!(
                        "field '{model}.{}' refers to unknown enumeration '{name}'",
                        def.name
                    ))
                })?;
                FieldKind::Enum(enum_type)
            }
            FieldType::Ref => {
                let target = target()?;
                let target_table = if target == model {
                    table.to_string()
                } else {
                    self.model(&target)?.table.clone()
                };
                FieldKind::Ref {
                    target,
                    target_table,
                }
            }
        };

        let column = match &kind {
            FieldKind::Ref { .. } => naming::foreign_key_column(&def.name),
            _ => def.name.clone(),
        };

        let mut field = Field {
            name: def.name.clone(),
            model: model.to_string(),
            table: table.to_string(),
            column,
            kind,
            required: def.required,
            default: None,
        };
        if let Some(default) = &def.default {
            let value = default_value(&field, default)?;
            field.check(&value).map_err(|e| {
                OrmError::Schema(format!("invalid default for '{model}.{}': {e}", def.name))
            })?;
            field.default = Some(value);
        }
        Ok(field)
    }

    fn infer_relations(&self, model: &Model) -> Result<Vec<Relation>> {
        let accessor = naming::reverse_accessor(&model.name);
        let mut relations: Vec<Relation> = Vec::new();

        for field in model.references() {
            let FieldKind::Ref { target, .. } = &field.kind else {
                continue;
            };
            let conflict = |reason: String| OrmError::RelationConflict {
                model: target.clone(),
                accessor: accessor.clone(),
                reason,
            };

            let target_fields: Vec<&str> = if *target == model.name {
                model.fields.iter().map(|f| f.name.as_str()).collect()
            } else {
                self.find(target)
                    .ok_or_else(|| OrmError::UnknownModel(target.clone()))?
                    .fields
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect()
            };
            if accessor == IDENTITY || target_fields.contains(&accessor.as_str()) {
                return Err(conflict(format!("collides with field '{target}.{accessor}'")));
            }

            let existing = self
                .relations
                .iter()
                .chain(relations.iter())
                .find(|r| r.target == *target && r.accessor == accessor);
            if let Some(existing) = existing {
                return Err(conflict(format!(
                    "is already installed by '{}.{}', cannot also serve '{}.{}'",
                    existing.source, existing.field, model.name, field.name
                )));
            }

            relations.push(Relation {
                source: model.name.clone(),
                field: field.name.clone(),
                column: field.column.clone(),
                target: target.clone(),
                accessor: accessor.clone(),
            });
        }
        Ok(relations)
    }

    pub fn model(&self, name: &str) -> Result<Arc<Model>> {
        self.find(name)
            .cloned()
            .ok_or_else(|| OrmError::UnknownModel(name.to_string()))
    }

    fn find(&self, name: &str) -> Option<&Arc<Model>> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.iter()
    }

    pub fn enumeration(&self, name: &str) -> Result<Arc<EnumType>> {
        self.enums
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::Schema(format!("unknown enumeration '{name}'")))
    }

    /// The relation behind reverse accessor `accessor` of model `target`.
    pub fn relation(&self, target: &str, accessor: &str) -> Result<&Relation> {
        self.relations
            .iter()
            .find(|r| r.target == target && r.accessor == accessor)
            .ok_or_else(|| OrmError::unknown_field(target, accessor))
    }

    /// Reverse accessors installed on `target`.
    pub fn relations_to<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a Relation> + 'a {
        self.relations.iter().filter(move |r| r.target == target)
    }
}

fn ensure_identifier(what: &str, name: &str) -> Result<()> {
    if naming::is_identifier(name) {
        Ok(())
    } else {
        Err(OrmError::Schema(format!("invalid {what} name '{name}'")))
    }
}

fn default_value(field: &Field, yaml: &serde_yaml::Value) -> Result<Value> {
    if yaml.is_null() {
        return Ok(Value::Null);
    }
    let value = match &field.kind {
        FieldKind::Integer => yaml.as_i64().map(Value::Integer),
        FieldKind::Real => yaml.as_f64().map(Value::Real),
        FieldKind::Text { .. } => yaml.as_str().map(Value::from),
        FieldKind::Boolean => yaml.as_bool().map(Value::Boolean),
        FieldKind::Datetime => yaml
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| Value::Datetime(dt.with_timezone(&Utc))),
        FieldKind::Enum(e) => match yaml.as_str() {
            Some(symbol) => Some(Value::Enum(e.value(symbol)?)),
            None => None,
        },
        FieldKind::Ref { .. } => {
            return Err(OrmError::Schema(format!(
                "reference field '{}.{}' cannot have a default",
                field.model, field.name
            )))
        }
    };
    value.ok_or_else(|| {
        OrmError::Schema(format!(
            "default for '{}.{}' is not a {}",
            field.model,
            field.name,
            field.kind.name()
        ))
    })
}
