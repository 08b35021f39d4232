//! Deterministic identifiers for the visual projection of foreign keys.
//!
//! Edge ids join their four components with [`EDGE_ID_DELIMITER`] and no escaping.
//! Ids that themselves contain the delimiter can therefore produce the same edge id
//! from different tuples; the engine reports such clashes as identity collisions
//! instead of rewriting ids.

use crate::models::{ColumnId, TableId};

pub const EDGE_ID_DELIMITER: char = '-';
pub const SOURCE_HANDLE_PREFIX: &str = "right-";
pub const TARGET_HANDLE_PREFIX: &str = "left-";

pub fn build_foreign_key_edge_id(
    source_table_id: &str,
    target_table_id: &str,
    source_column_id: &str,
    referenced_column_id: &str,
) -> String {
    let mut id = String::with_capacity(
        source_table_id.len()
            + target_table_id.len()
            + source_column_id.len()
            + referenced_column_id.len()
            + 3,
    );
    for (position, part) in [
        source_table_id,
        target_table_id,
        source_column_id,
        referenced_column_id,
    ]
    .into_iter()
    .enumerate()
    {
        if position > 0 {
            id.push(EDGE_ID_DELIMITER);
        }
        id.push_str(part);
    }
    id
}

pub fn edge_id_for(
    source_table_id: &TableId,
    target_table_id: &TableId,
    source_column_id: &ColumnId,
    referenced_column_id: &ColumnId,
) -> String {
    build_foreign_key_edge_id(
        source_table_id.as_str(),
        target_table_id.as_str(),
        source_column_id.as_str(),
        referenced_column_id.as_str(),
    )
}

pub fn source_handle(column_id: &ColumnId) -> String {
    format!("{SOURCE_HANDLE_PREFIX}{column_id}")
}

pub fn target_handle(referenced_column_id: &ColumnId) -> String {
    format!("{TARGET_HANDLE_PREFIX}{referenced_column_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_components_in_fixed_order() {
        assert_eq!(
            build_foreign_key_edge_id("t1", "t2", "col1", "col2"),
            "t1-t2-col1-col2"
        );
    }

    #[test]
    fn is_deterministic() {
        let first = build_foreign_key_edge_id("orders", "users", "user_id", "id");
        let second = build_foreign_key_edge_id("orders", "users", "user_id", "id");
        assert_eq!(first, second);
    }

    #[test]
    fn is_order_sensitive() {
        let base = build_foreign_key_edge_id("t1", "t2", "col1", "col2");
        assert_ne!(base, build_foreign_key_edge_id("t1", "t2", "col1", "col3"));
        assert_ne!(base, build_foreign_key_edge_id("t1", "t2", "col2", "col1"));
        assert_ne!(base, build_foreign_key_edge_id("t2", "t1", "col1", "col2"));
    }

    #[test]
    fn accepts_empty_components() {
        assert_eq!(build_foreign_key_edge_id("", "", "", ""), "---");
    }

    // Known limitation: the delimiter is not escaped, so these two tuples collide.
    #[test]
    fn ids_containing_the_delimiter_can_collide() {
        let left = build_foreign_key_edge_id("a-b", "c", "d", "e");
        let right = build_foreign_key_edge_id("a", "b-c", "d", "e");
        assert_eq!(left, right);
    }

    #[test]
    fn handles_use_literal_prefixes() {
        assert_eq!(source_handle(&ColumnId::from("c1")), "right-c1");
        assert_eq!(target_handle(&ColumnId::from("c9")), "left-c9");
    }
}
