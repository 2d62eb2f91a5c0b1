pub mod error;
pub mod value;
pub mod schema;
pub mod registry;
pub mod expr;
pub mod storage;
pub mod sync;
pub mod recordset;
pub mod instance;
pub mod session;

pub use error::{OrmError, Result};
pub use expr::{CompareOp, Direction, Expr, FieldRef, OrderBy};
pub use instance::{Record, RecordBuilder};
pub use recordset::RecordSet;
pub use registry::{Field, FieldKind, Model, Registry, Relation};
pub use schema::{
    parse_schema, parse_schema_str, EnumDefinition, FieldDefinition, FieldType, ModelDefinition,
    SchemaDefinition,
};
pub use session::{Session, SessionOptions};
pub use storage::{SqliteStorage, Storage};
pub use sync::{StructureChange, SyncAction, SyncMode, SyncReport};
pub use value::{EnumValue, RefValue, Value};
