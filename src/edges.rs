use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::identity;
use crate::models::{
    ColumnId, ColumnMapping, ForeignKey, ForeignKeyId, ReferentialAction, TableId,
};

/// Old column id to new column id, scoped to a single table.
pub type ColumnRenameMap = HashMap<ColumnId, ColumnId>;

/// Copy of the owning foreign key carried on each of its edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeData {
    pub id: ForeignKeyId,
    pub name: String,
    pub columns_ids: Vec<ColumnId>,
    pub referenced_table_id: TableId,
    pub referenced_columns_ids: Vec<ColumnId>,
    pub on_delete_action: ReferentialAction,
    pub on_update_action: ReferentialAction,
}

impl EdgeData {
    pub fn from_foreign_key(foreign_key: &ForeignKey) -> Self {
        Self {
            id: foreign_key.id.clone(),
            name: foreign_key.name.clone(),
            columns_ids: foreign_key.columns_ids(),
            referenced_table_id: foreign_key.referenced_table_id.clone(),
            referenced_columns_ids: foreign_key.referenced_columns_ids(),
            on_delete_action: foreign_key.on_delete_action,
            on_update_action: foreign_key.on_update_action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: TableId,
    pub target: TableId,
    pub source_handle: String,
    pub target_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

impl Edge {
    pub fn foreign_key_id(&self) -> Option<&ForeignKeyId> {
        self.data.as_ref().map(|data| &data.id)
    }
}

fn edge_for_mapping(foreign_key: &ForeignKey, mapping: &ColumnMapping, data: &EdgeData) -> Edge {
    Edge {
        id: identity::edge_id_for(
            &foreign_key.table_id,
            &foreign_key.referenced_table_id,
            &mapping.column,
            &mapping.referenced_column,
        ),
        source: foreign_key.table_id.clone(),
        target: foreign_key.referenced_table_id.clone(),
        source_handle: identity::source_handle(&mapping.column),
        target_handle: identity::target_handle(&mapping.referenced_column),
        data: Some(data.clone()),
    }
}

/// Projects a foreign key into one edge per column mapping, in mapping order.
pub fn foreign_key_edges(foreign_key: &ForeignKey) -> Vec<Edge> {
    let data = EdgeData::from_foreign_key(foreign_key);
    foreign_key
        .mappings
        .iter()
        .map(|mapping| edge_for_mapping(foreign_key, mapping, &data))
        .collect()
}

/// Keeps every edge whose `data.id` differs from `foreign_key_id`.
///
/// Matching never looks at the edge's own id. Edges without data are always kept.
pub fn remove_edges_for_foreign_key(edges: Vec<Edge>, foreign_key_id: &ForeignKeyId) -> Vec<Edge> {
    edges
        .into_iter()
        .filter(|edge| edge.foreign_key_id() != Some(foreign_key_id))
        .collect()
}

fn rename_ids(ids: &mut [ColumnId], renames: &ColumnRenameMap) -> bool {
    let mut changed = false;
    for id in ids.iter_mut() {
        if let Some(renamed) = renames.get(id) {
            if renamed != id {
                *id = renamed.clone();
                changed = true;
            }
        }
    }
    changed
}

/// Rewrites `data.referencedColumnsIds` of edges pointing at `target_table_id`.
///
/// Handles and edge ids are left as they were created. Returns the number of edges changed.
pub fn apply_column_renames_to_incoming_foreign_key_edges(
    edges: &mut [Edge],
    target_table_id: &TableId,
    renames: &ColumnRenameMap,
) -> usize {
    if renames.is_empty() {
        return 0;
    }
    let mut updated = 0;
    for edge in edges.iter_mut().filter(|edge| &edge.target == target_table_id) {
        if let Some(data) = edge.data.as_mut() {
            if rename_ids(&mut data.referenced_columns_ids, renames) {
                updated += 1;
            }
        }
    }
    updated
}

/// Rewrites `data.columnsIds` of edges leaving `source_table_id`.
///
/// Handles and edge ids are left as they were created. Returns the number of edges changed.
pub fn apply_column_renames_to_outgoing_foreign_key_edges(
    edges: &mut [Edge],
    source_table_id: &TableId,
    renames: &ColumnRenameMap,
) -> usize {
    if renames.is_empty() {
        return 0;
    }
    let mut updated = 0;
    for edge in edges.iter_mut().filter(|edge| &edge.source == source_table_id) {
        if let Some(data) = edge.data.as_mut() {
            if rename_ids(&mut data.columns_ids, renames) {
                updated += 1;
            }
        }
    }
    updated
}
