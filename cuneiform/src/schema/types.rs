use crate::value::{format_datetime, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A whole schema: enumerations and models, in declaration order.
/// Parsed from YAML or assembled with the builder methods below.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(default)]
    pub enums: Vec<EnumDefinition>,
    #[serde(default)]
    pub models: Vec<ModelDefinition>,
}

/// An enumeration with explicit, stable integer codes per symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDefinition {
    pub name: String,
    pub symbols: BTreeMap<String, i64>,
}

/// Declaration of a single model. The identity field `id` is implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Declaration of a single field of a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Enumeration name for `enum` fields, model name for `ref` fields.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
}

/// Declared semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
    Datetime,
    Enum,
    Ref,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enumeration(mut self, def: EnumDefinition) -> Self {
        self.enums.push(def);
        self
    }

    pub fn model(mut self, def: ModelDefinition) -> Self {
        self.models.push(def);
        self
    }
}

impl EnumDefinition {
    pub fn new(name: &str) -> Self {
        EnumDefinition {
            name: name.to_string(),
            symbols: BTreeMap::new(),
        }
    }

    pub fn symbol(mut self, symbol: &str, code: i64) -> Self {
        self.symbols.insert(symbol.to_string(), code);
        self
    }
}

impl ModelDefinition {
    pub fn new(name: &str) -> Self {
        ModelDefinition {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        FieldDefinition {
            name: name.to_string(),
            field_type,
            target: None,
            required: false,
            default: None,
            min_length: None,
            max_length: None,
        }
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn real(name: &str) -> Self {
        Self::new(name, FieldType::Real)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::Datetime)
    }

    pub fn enumeration(name: &str, enumeration: &str) -> Self {
        let mut field = Self::new(name, FieldType::Enum);
        field.target = Some(enumeration.to_string());
        field
    }

    pub fn reference(name: &str, model: &str) -> Self {
        let mut field = Self::new(name, FieldType::Ref);
        field.target = Some(model.to_string());
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value_to_yaml(&value.into()));
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    pub fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }
}

/// Declarative form of a value, as it would be written in a schema file.
pub fn value_to_yaml(value: &Value) -> serde_yaml::Value {
    match value {
        Value::Null => serde_yaml::Value::Null,
        Value::Integer(n) => serde_yaml::Value::Number((*n).into()),
        Value::Real(x) => serde_yaml::Value::Number((*x).into()),
        Value::Text(s) => serde_yaml::Value::String(s.clone()),
        Value::Boolean(b) => serde_yaml::Value::Bool(*b),
        Value::Datetime(dt) => serde_yaml::Value::String(format_datetime(dt)),
        Value::Enum(e) => serde_yaml::Value::String(e.symbol.clone()),
        Value::Ref(r) => serde_yaml::Value::Number(r.id.into()),
    }
}
