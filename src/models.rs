use std::fmt;

use serde::{Deserialize, Serialize};

use crate::edges::Edge;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(TableId);
string_id!(ColumnId);
string_id!(ForeignKeyId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

pub(crate) fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: TableId,
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column(&self, column_id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|column| &column.id == column_id)
    }

    pub fn has_column(&self, column_id: &ColumnId) -> bool {
        self.column(column_id).is_some()
    }

    /// Resolves a column reference by id, falling back to a unique name match.
    pub fn resolve_column(&self, reference: &str) -> Option<&Column> {
        if let Some(column) = self.columns.iter().find(|c| c.id.as_str() == reference) {
            return Some(column);
        }
        let mut by_name = self.columns.iter().filter(|c| c.name == reference);
        match (by_name.next(), by_name.next()) {
            (Some(column), None) => Some(column),
            _ => None,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
}

/// One `column -> referencedColumn` pair of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub column: ColumnId,
    pub referenced_column: ColumnId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub id: ForeignKeyId,
    pub name: String,
    pub table_id: TableId,
    pub referenced_table_id: TableId,
    pub mappings: Vec<ColumnMapping>,
    pub on_delete_action: ReferentialAction,
    pub on_update_action: ReferentialAction,
}

impl ForeignKey {
    pub fn columns_ids(&self) -> Vec<ColumnId> {
        self.mappings.iter().map(|m| m.column.clone()).collect()
    }

    pub fn referenced_columns_ids(&self) -> Vec<ColumnId> {
        self.mappings
            .iter()
            .map(|m| m.referenced_column.clone())
            .collect()
    }

    pub fn touches_table(&self, table_id: &TableId) -> bool {
        &self.table_id == table_id || &self.referenced_table_id == table_id
    }

    /// Whether any mapping reads `column_id` on `table_id`, on either side.
    pub fn references_column(&self, table_id: &TableId, column_id: &ColumnId) -> bool {
        let as_source =
            &self.table_id == table_id && self.mappings.iter().any(|m| &m.column == column_id);
        let as_target = &self.referenced_table_id == table_id
            && self
                .mappings
                .iter()
                .any(|m| &m.referenced_column == column_id);
        as_source || as_target
    }
}

/// Root aggregate exchanged with persistence: the schema document and its version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

/// The committed model plus its derived edge projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub version: u64,
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
    pub edges: Vec<Edge>,
}

impl SchemaSnapshot {
    pub fn into_schema(self) -> Schema {
        Schema {
            version: self.version,
            tables: self.tables,
            foreign_keys: self.foreign_keys,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaInvariantViolation {
    DuplicateTableId {
        table_id: TableId,
    },
    DuplicateTableName {
        schema: String,
        name: String,
    },
    DuplicateColumnId {
        table_id: TableId,
        column_id: ColumnId,
    },
    DuplicateColumnName {
        table_id: TableId,
        name: String,
    },
    DuplicateForeignKeyId {
        foreign_key_id: ForeignKeyId,
    },
    EmptyMappings {
        foreign_key_id: ForeignKeyId,
    },
    DuplicateMappingColumn {
        foreign_key_id: ForeignKeyId,
        column_id: ColumnId,
    },
    UnknownTableReference {
        foreign_key_id: ForeignKeyId,
        table_id: TableId,
    },
    UnknownColumnReference {
        foreign_key_id: ForeignKeyId,
        table_id: TableId,
        column_id: ColumnId,
    },
    SetNullOnRequiredColumn {
        foreign_key_id: ForeignKeyId,
        column_id: ColumnId,
    },
    OrphanEdge {
        edge_id: String,
    },
    StaleEdgeData {
        edge_id: String,
        foreign_key_id: ForeignKeyId,
    },
    EdgeCountMismatch {
        foreign_key_id: ForeignKeyId,
        expected: usize,
        actual: usize,
    },
    DuplicateEdgeId {
        edge_id: String,
    },
}

impl SchemaInvariantViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            SchemaInvariantViolation::DuplicateTableId { .. } => "schema_duplicate_table_id",
            SchemaInvariantViolation::DuplicateTableName { .. } => "schema_duplicate_table_name",
            SchemaInvariantViolation::DuplicateColumnId { .. } => "schema_duplicate_column_id",
            SchemaInvariantViolation::DuplicateColumnName { .. } => "schema_duplicate_column_name",
            SchemaInvariantViolation::DuplicateForeignKeyId { .. } => {
                "schema_duplicate_foreign_key_id"
            }
            SchemaInvariantViolation::EmptyMappings { .. } => "foreign_key_empty_mappings",
            SchemaInvariantViolation::DuplicateMappingColumn { .. } => {
                "foreign_key_duplicate_mapping_column"
            }
            SchemaInvariantViolation::UnknownTableReference { .. } => {
                "foreign_key_unknown_table_reference"
            }
            SchemaInvariantViolation::UnknownColumnReference { .. } => {
                "foreign_key_unknown_column_reference"
            }
            SchemaInvariantViolation::SetNullOnRequiredColumn { .. } => {
                "foreign_key_set_null_on_required_column"
            }
            SchemaInvariantViolation::OrphanEdge { .. } => "edge_orphaned",
            SchemaInvariantViolation::StaleEdgeData { .. } => "edge_stale_data",
            SchemaInvariantViolation::EdgeCountMismatch { .. } => "edge_count_mismatch",
            SchemaInvariantViolation::DuplicateEdgeId { .. } => "edge_identity_collision",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            SchemaInvariantViolation::DuplicateTableId { .. } => "Table ids must be unique",
            SchemaInvariantViolation::DuplicateTableName { .. } => {
                "Table names must be unique within a schema"
            }
            SchemaInvariantViolation::DuplicateColumnId { .. } => {
                "Column ids must be unique within a table"
            }
            SchemaInvariantViolation::DuplicateColumnName { .. } => {
                "Column names must be unique within a table"
            }
            SchemaInvariantViolation::DuplicateForeignKeyId { .. } => {
                "Foreign key ids must be unique"
            }
            SchemaInvariantViolation::EmptyMappings { .. } => {
                "Foreign key must map at least one column"
            }
            SchemaInvariantViolation::DuplicateMappingColumn { .. } => {
                "Foreign key maps the same column more than once"
            }
            SchemaInvariantViolation::UnknownTableReference { .. } => {
                "Foreign key references a table that does not exist"
            }
            SchemaInvariantViolation::UnknownColumnReference { .. } => {
                "Foreign key references a column that does not exist"
            }
            SchemaInvariantViolation::SetNullOnRequiredColumn { .. } => {
                "SET_NULL actions require nullable columns"
            }
            SchemaInvariantViolation::OrphanEdge { .. } => {
                "Edge does not belong to any foreign key"
            }
            SchemaInvariantViolation::StaleEdgeData { .. } => {
                "Edge payload is out of sync with its foreign key"
            }
            SchemaInvariantViolation::EdgeCountMismatch { .. } => {
                "Foreign key must project exactly one edge per mapping"
            }
            SchemaInvariantViolation::DuplicateEdgeId { .. } => {
                "Two edges resolve to the same derived identity"
            }
        }
    }

    pub const fn is_identity_collision(&self) -> bool {
        matches!(self, SchemaInvariantViolation::DuplicateEdgeId { .. })
    }

    /// The foreign key a violation is about, if it concerns one.
    pub const fn foreign_key_id(&self) -> Option<&ForeignKeyId> {
        match self {
            SchemaInvariantViolation::DuplicateForeignKeyId { foreign_key_id }
            | SchemaInvariantViolation::EmptyMappings { foreign_key_id }
            | SchemaInvariantViolation::DuplicateMappingColumn { foreign_key_id, .. }
            | SchemaInvariantViolation::UnknownTableReference { foreign_key_id, .. }
            | SchemaInvariantViolation::UnknownColumnReference { foreign_key_id, .. }
            | SchemaInvariantViolation::SetNullOnRequiredColumn { foreign_key_id, .. }
            | SchemaInvariantViolation::StaleEdgeData { foreign_key_id, .. }
            | SchemaInvariantViolation::EdgeCountMismatch { foreign_key_id, .. } => {
                Some(foreign_key_id)
            }
            SchemaInvariantViolation::DuplicateTableId { .. }
            | SchemaInvariantViolation::DuplicateTableName { .. }
            | SchemaInvariantViolation::DuplicateColumnId { .. }
            | SchemaInvariantViolation::DuplicateColumnName { .. }
            | SchemaInvariantViolation::OrphanEdge { .. }
            | SchemaInvariantViolation::DuplicateEdgeId { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn column(id: &str, name: &str) -> Column {
        Column {
            id: ColumnId::from(id),
            name: name.to_string(),
            data_type: "int".to_string(),
            primary_key: false,
            computed: false,
            nullable: true,
        }
    }

    #[test]
    fn resolve_column_prefers_id_over_name() {
        let table = Table {
            id: TableId::from("t1"),
            schema: "dbo".to_string(),
            name: "orders".to_string(),
            columns: vec![column("c1", "c2"), column("c2", "customer_id")],
        };

        assert_eq!(
            table.resolve_column("c2").map(|c| c.id.as_str()),
            Some("c2")
        );
        assert_eq!(
            table.resolve_column("customer_id").map(|c| c.id.as_str()),
            Some("c2")
        );
        assert!(table.resolve_column("missing").is_none());
    }

    #[test]
    fn resolve_column_rejects_ambiguous_names() {
        let table = Table {
            id: TableId::from("t1"),
            schema: "dbo".to_string(),
            name: "orders".to_string(),
            columns: vec![column("a", "dup"), column("b", "dup")],
        };
        assert!(table.resolve_column("dup").is_none());
    }

    #[test]
    fn schema_document_uses_camel_case_and_defaults() {
        let schema: Schema = serde_json::from_value(json!({
            "version": 4,
            "tables": [{
                "id": "t1",
                "schema": "dbo",
                "name": "users",
                "columns": [{"id": "c1", "name": "id", "dataType": "int", "primaryKey": true}]
            }],
            "foreignKeys": []
        }))
        .expect("schema should parse");

        assert_eq!(schema.version, 4);
        let id_column = &schema.tables[0].columns[0];
        assert!(id_column.primary_key);
        assert!(!id_column.computed);
        assert!(id_column.nullable);
    }

    #[test]
    fn referential_actions_use_screaming_case() {
        let action: ReferentialAction = serde_json::from_value(json!("SET_NULL")).expect("ok");
        assert_eq!(action, ReferentialAction::SetNull);
        assert!(serde_json::from_value::<ReferentialAction>(json!("set null")).is_err());
    }

    #[test]
    fn references_column_checks_both_sides() {
        let fk = ForeignKey {
            id: ForeignKeyId::from("fk"),
            name: "fk_orders_users".to_string(),
            table_id: TableId::from("orders"),
            referenced_table_id: TableId::from("users"),
            mappings: vec![ColumnMapping {
                column: ColumnId::from("user_id"),
                referenced_column: ColumnId::from("id"),
            }],
            on_delete_action: ReferentialAction::Cascade,
            on_update_action: ReferentialAction::NoAction,
        };

        assert!(fk.references_column(&TableId::from("orders"), &ColumnId::from("user_id")));
        assert!(fk.references_column(&TableId::from("users"), &ColumnId::from("id")));
        assert!(!fk.references_column(&TableId::from("orders"), &ColumnId::from("id")));
    }
}
