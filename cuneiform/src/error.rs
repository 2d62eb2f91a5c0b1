use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Type mismatch on {model}.{field}: expected {expected}, got {found}")]
    TypeMismatch {
        model: String,
        field: String,
        expected: String,
        found: String,
    },

    #[error("Relation conflict on {model}: accessor '{accessor}' {reason}")]
    RelationConflict {
        model: String,
        accessor: String,
        reason: String,
    },

    #[error("No {model} row matches {filter}")]
    NotFound { model: String, filter: String },

    #[error("{count} {model} rows match {filter}, expected exactly one")]
    MultipleResultsFound {
        model: String,
        filter: String,
        count: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unknown field: {model}.{field}")]
    UnknownField { model: String, field: String },

    #[error("{model} instance has not been saved yet")]
    Unsaved { model: String },

    #[error("Cyclic save: {model} is already being saved further up the reference chain")]
    CyclicSave { model: String },

    #[error("Invalid limit {0}: must be a non-negative integer")]
    InvalidLimit(i64),

    #[error("Decode error on {table}.{column}: {reason}")]
    Decode {
        table: String,
        column: String,
        reason: String,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrmError {
    pub(crate) fn type_mismatch(
        model: &str,
        field: &str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        OrmError::TypeMismatch {
            model: model.to_string(),
            field: field.to_string(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn unknown_field(model: &str, field: &str) -> Self {
        OrmError::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrmError>;
