//! Static type/field mappings and node identity maps.
//!
//! Both are loaded or built once per run and are read-only during replay.

pub mod error;
pub mod nodes;
pub mod table;
pub mod well_known;

pub use error::MappingError;
pub use nodes::{clone_node_tree, NodeIdentityMap};
pub use table::{AllowedValueMapping, FieldMapping, MappingTable, TypeMapping};
pub use well_known::FieldRole;
