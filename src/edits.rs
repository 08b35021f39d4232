use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ColumnId, ForeignKeyId, ReferentialAction, default_nullable};

/// The nine edit kinds, keyed by the `op` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditOpKind {
    AddTable,
    SetTable,
    DropTable,
    AddColumn,
    SetColumn,
    DropColumn,
    AddForeignKey,
    SetForeignKey,
    DropForeignKey,
}

impl EditOpKind {
    pub const ALL: [EditOpKind; 9] = [
        EditOpKind::AddTable,
        EditOpKind::SetTable,
        EditOpKind::DropTable,
        EditOpKind::AddColumn,
        EditOpKind::SetColumn,
        EditOpKind::DropColumn,
        EditOpKind::AddForeignKey,
        EditOpKind::SetForeignKey,
        EditOpKind::DropForeignKey,
    ];

    pub const fn as_tag(self) -> &'static str {
        match self {
            EditOpKind::AddTable => "add_table",
            EditOpKind::SetTable => "set_table",
            EditOpKind::DropTable => "drop_table",
            EditOpKind::AddColumn => "add_column",
            EditOpKind::SetColumn => "set_column",
            EditOpKind::DropColumn => "drop_column",
            EditOpKind::AddForeignKey => "add_foreign_key",
            EditOpKind::SetForeignKey => "set_foreign_key",
            EditOpKind::DropForeignKey => "drop_foreign_key",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_tag() == tag)
    }
}

impl fmt::Display for EditOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ColumnId>,
    pub name: String,
    pub data_type: String,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

/// Column references are resolved against the owning and referenced tables at apply time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MappingSpec {
    pub column: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForeignKeySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ForeignKeyId>,
    pub name: String,
    pub referenced_table: String,
    pub mappings: Vec<MappingSpec>,
    pub on_delete_action: ReferentialAction,
    pub on_update_action: ReferentialAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TableChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ColumnChanges {
    /// Re-keys the column. Foreign keys and edge payloads follow the new id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForeignKeyChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referenced_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<MappingSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete_action: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update_action: Option<ReferentialAction>,
}

impl ForeignKeyChanges {
    /// Whether applying these changes requires the foreign key's edges to be rebuilt.
    pub fn reshapes_edges(&self) -> bool {
        self.mappings.is_some() || self.referenced_table.is_some()
    }
}

/// A single schema edit. Table, column and foreign key fields are references that
/// resolve by id first and by name second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    rename_all = "snake_case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum EditOperation {
    AddTable {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        initial_columns: Vec<ColumnSpec>,
    },
    SetTable {
        table: String,
        set: TableChanges,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    SetColumn {
        table: String,
        column: String,
        set: ColumnChanges,
    },
    DropColumn {
        table: String,
        column: String,
    },
    AddForeignKey {
        table: String,
        foreign_key: ForeignKeySpec,
    },
    SetForeignKey {
        table: String,
        foreign_key: String,
        set: ForeignKeyChanges,
    },
    DropForeignKey {
        table: String,
        foreign_key: String,
    },
}

impl EditOperation {
    pub const fn kind(&self) -> EditOpKind {
        match self {
            EditOperation::AddTable { .. } => EditOpKind::AddTable,
            EditOperation::SetTable { .. } => EditOpKind::SetTable,
            EditOperation::DropTable { .. } => EditOpKind::DropTable,
            EditOperation::AddColumn { .. } => EditOpKind::AddColumn,
            EditOperation::SetColumn { .. } => EditOpKind::SetColumn,
            EditOperation::DropColumn { .. } => EditOpKind::DropColumn,
            EditOperation::AddForeignKey { .. } => EditOpKind::AddForeignKey,
            EditOperation::SetForeignKey { .. } => EditOpKind::SetForeignKey,
            EditOperation::DropForeignKey { .. } => EditOpKind::DropForeignKey,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            EditOperation::AddTable { table, .. }
            | EditOperation::SetTable { table, .. }
            | EditOperation::DropTable { table }
            | EditOperation::AddColumn { table, .. }
            | EditOperation::SetColumn { table, .. }
            | EditOperation::DropColumn { table, .. }
            | EditOperation::AddForeignKey { table, .. }
            | EditOperation::SetForeignKey { table, .. }
            | EditOperation::DropForeignKey { table, .. } => table,
        }
    }
}
