pub mod config;
pub mod edges;
pub mod edits;
pub mod error;
pub mod graph;
pub mod identity;
pub mod invariants;
pub mod models;
pub mod operations;
pub mod validation;

pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::edges::{
        ColumnRenameMap, Edge, EdgeData, apply_column_renames_to_incoming_foreign_key_edges,
        apply_column_renames_to_outgoing_foreign_key_edges, remove_edges_for_foreign_key,
    };
    pub use crate::edits::{
        ColumnChanges, ColumnSpec, EditOpKind, EditOperation, ForeignKeyChanges, ForeignKeySpec,
        MappingSpec, TableChanges,
    };
    pub use crate::error::{EngineError, ErrorDetails, ErrorKind, Rejection, Result};
    pub use crate::graph::SchemaGraph;
    pub use crate::identity::{build_foreign_key_edge_id, source_handle, target_handle};
    pub use crate::models::{
        Column, ColumnId, ColumnMapping, ForeignKey, ForeignKeyId, ReferentialAction, Schema,
        SchemaInvariantViolation, SchemaSnapshot, Table, TableId,
    };
    pub use crate::operations::{
        ApplyEditsPayload, SchemaChange, SchemaEditor, SchemaOperation, SchemaOperationResult,
        SchemaResponse, SubscriptionId,
    };
    pub use crate::validation::{ShapeError, validate_batch, validate_edit};
}
