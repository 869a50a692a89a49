//! Core data model shared by every stage of a synchronization.
//!
//! - [`schema`]: table and column descriptors resolved from the catalog
//! - [`value`]: owned SQL values carried between records and tables
//! - [`record`]: the property-access seam records implement
//! - [`identifier`]: identifier validation and bracket quoting

pub mod identifier;
pub mod record;
pub mod schema;
pub mod value;

pub use record::{DynamicRecord, Entity, Record};
pub use schema::{ColumnDescriptor, GenerationKind, ScalarType, TableSchema};
pub use value::SqlValue;
