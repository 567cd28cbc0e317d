//! Configuration schema: declared fields, typed values and user records.

pub mod record;
pub mod registry;
pub mod value;

pub use record::UserConfigRecord;
pub use registry::{
    is_plain_identifier, ColumnInfo, SchemaError, SchemaField, SchemaRegistry, KEY_COLUMN,
};
pub use value::{CoercionError, ConfigValue, RawValue, SemanticType};
