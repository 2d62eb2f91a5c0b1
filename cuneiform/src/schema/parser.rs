// YAML front end for schema declarations.

use super::types::SchemaDefinition;
use crate::error::Result;
use std::path::Path;

/// Read a YAML schema document from disk. I/O and YAML failures both
/// surface as `OrmError`.
pub fn parse_schema(path: &Path) -> Result<SchemaDefinition> {
    parse_schema_str(&std::fs::read_to_string(path)?)
}

/// Enums and models from YAML text, kept in the order they are declared.
pub fn parse_schema_str(yaml: &str) -> Result<SchemaDefinition> {
    Ok(serde_yaml::from_str(yaml)?)
}
