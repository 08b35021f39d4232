use std::collections::HashSet;
use std::mem;

use anyhow::anyhow;

use crate::edges::{
    ColumnRenameMap, Edge, EdgeData, apply_column_renames_to_incoming_foreign_key_edges,
    apply_column_renames_to_outgoing_foreign_key_edges, foreign_key_edges,
    remove_edges_for_foreign_key,
};
use crate::edits::{ColumnChanges, MappingSpec, TableChanges};
use crate::error::{EngineError, Result};
use crate::invariants;
use crate::models::{
    Column, ColumnId, ColumnMapping, ForeignKey, ForeignKeyId, Schema, SchemaInvariantViolation,
    SchemaSnapshot, Table, TableId,
};

/// In-memory schema model with its edge projection.
///
/// Foreign keys are the source of truth for edges. Edges are only created from a foreign
/// key projection, removed by foreign key id, or have their column payloads renamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaGraph {
    tables: Vec<Table>,
    foreign_keys: Vec<ForeignKey>,
    edges: Vec<Edge>,
}

impl SchemaGraph {
    /// Builds a graph from a schema document, projecting every foreign key into edges.
    pub fn from_schema(schema: Schema) -> Self {
        let edges = schema.foreign_keys.iter().flat_map(foreign_key_edges).collect();
        Self {
            tables: schema.tables,
            foreign_keys: schema.foreign_keys,
            edges,
        }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn table(&self, table_id: &TableId) -> Option<&Table> {
        self.tables.iter().find(|table| &table.id == table_id)
    }

    pub fn foreign_key(&self, foreign_key_id: &ForeignKeyId) -> Option<&ForeignKey> {
        self.foreign_keys.iter().find(|fk| &fk.id == foreign_key_id)
    }

    pub fn snapshot(&self, version: u64) -> SchemaSnapshot {
        SchemaSnapshot {
            version,
            tables: self.tables.clone(),
            foreign_keys: self.foreign_keys.clone(),
            edges: self.edges.clone(),
        }
    }

    pub fn ensure_invariants(&self) -> Result<()> {
        invariants::ensure_schema_invariants(&self.tables, &self.foreign_keys, &self.edges)
    }

    pub fn invariant_violations(&self) -> Vec<SchemaInvariantViolation> {
        invariants::schema_invariant_violations(&self.tables, &self.foreign_keys, &self.edges)
    }

    /// Resolves a table by id, then by unique name, then by `schema.name`.
    pub fn resolve_table(&self, reference: &str) -> Result<&Table> {
        if let Some(table) = self.tables.iter().find(|t| t.id.as_str() == reference) {
            return Ok(table);
        }
        let mut by_name = self.tables.iter().filter(|t| t.name == reference);
        if let (Some(table), None) = (by_name.next(), by_name.next()) {
            return Ok(table);
        }
        self.tables
            .iter()
            .find(|t| t.qualified_name() == reference)
            .ok_or_else(|| EngineError::not_found("table", reference, "Table not found"))
    }

    pub fn resolve_column(&self, table_id: &TableId, reference: &str) -> Result<&Column> {
        self.table(table_id)
            .and_then(|table| table.resolve_column(reference))
            .ok_or_else(|| EngineError::not_found("column", reference, "Column not found"))
    }

    /// Resolves a foreign key owned by `table_id` by id, then by name.
    pub fn resolve_foreign_key(&self, table_id: &TableId, reference: &str) -> Result<&ForeignKey> {
        let mut by_name = None;
        for foreign_key in self.foreign_keys.iter().filter(|fk| &fk.table_id == table_id) {
            if foreign_key.id.as_str() == reference {
                return Ok(foreign_key);
            }
            if by_name.is_none() && foreign_key.name == reference {
                by_name = Some(foreign_key);
            }
        }
        by_name.ok_or_else(|| {
            EngineError::not_found("foreign key", reference, "Foreign key not found")
        })
    }

    pub fn resolve_mappings(
        &self,
        table_id: &TableId,
        referenced_table_id: &TableId,
        specs: &[MappingSpec],
    ) -> Result<Vec<ColumnMapping>> {
        specs
            .iter()
            .map(|spec| {
                Ok(ColumnMapping {
                    column: self.resolve_column(table_id, &spec.column)?.id.clone(),
                    referenced_column: self
                        .resolve_column(referenced_table_id, &spec.referenced_column)?
                        .id
                        .clone(),
                })
            })
            .collect()
    }

    pub fn foreign_keys_referencing<'a>(
        &'a self,
        table_id: &'a TableId,
        column_id: &'a ColumnId,
    ) -> impl Iterator<Item = &'a ForeignKey> + 'a {
        self.foreign_keys
            .iter()
            .filter(move |fk| fk.references_column(table_id, column_id))
    }

    fn table_mut(&mut self, table_id: &TableId) -> Result<&mut Table> {
        self.tables
            .iter_mut()
            .find(|table| &table.id == table_id)
            .ok_or_else(|| EngineError::not_found("table", table_id.as_str(), "Table not found"))
    }

    fn ensure_unique_table_name(&self, schema: &str, name: &str, except: &TableId) -> Result<()> {
        let clash = self
            .tables
            .iter()
            .any(|t| &t.id != except && t.schema == schema && t.name == name);
        if clash {
            return Err(EngineError::invariant(
                "schema_duplicate_table_name",
                "Table names must be unique within a schema",
                anyhow!("table {schema}.{name} already exists"),
            ));
        }
        Ok(())
    }

    pub fn insert_table(&mut self, table: Table) -> Result<()> {
        if self.table(&table.id).is_some() {
            return Err(EngineError::invariant(
                "schema_duplicate_table_id",
                "Table ids must be unique",
                anyhow!("table id {} already exists", table.id),
            ));
        }
        self.ensure_unique_table_name(&table.schema, &table.name, &table.id)?;

        let mut column_ids = HashSet::with_capacity(table.columns.len());
        let mut column_names = HashSet::with_capacity(table.columns.len());
        for column in &table.columns {
            if !column_ids.insert(&column.id) || !column_names.insert(column.name.as_str()) {
                return Err(EngineError::invariant(
                    "schema_duplicate_column",
                    "Column ids and names must be unique within a table",
                    anyhow!("column {} ({}) is duplicated", column.name, column.id),
                ));
            }
        }

        self.tables.push(table);
        Ok(())
    }

    pub fn update_table(&mut self, table_id: &TableId, changes: &TableChanges) -> Result<()> {
        let current = self
            .table(table_id)
            .ok_or_else(|| EngineError::not_found("table", table_id.as_str(), "Table not found"))?;
        let schema = changes.schema.clone().unwrap_or_else(|| current.schema.clone());
        let name = changes.name.clone().unwrap_or_else(|| current.name.clone());
        if name.trim().is_empty() || schema.trim().is_empty() {
            return Err(EngineError::invariant(
                "table_name_empty",
                "Table name and schema must not be empty",
                anyhow!("table {table_id} would have an empty name or schema"),
            ));
        }
        self.ensure_unique_table_name(&schema, &name, table_id)?;

        let table = self.table_mut(table_id)?;
        table.schema = schema;
        table.name = name;
        Ok(())
    }

    /// Removes a table together with every foreign key it owns or is referenced by.
    pub fn remove_table(&mut self, table_id: &TableId) -> Result<Vec<ForeignKeyId>> {
        let position = self
            .tables
            .iter()
            .position(|table| &table.id == table_id)
            .ok_or_else(|| EngineError::not_found("table", table_id.as_str(), "Table not found"))?;

        let cascaded = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.touches_table(table_id))
            .map(|fk| fk.id.clone())
            .collect::<Vec<_>>();
        for foreign_key_id in &cascaded {
            self.remove_foreign_key(foreign_key_id)?;
        }

        self.tables.remove(position);
        Ok(cascaded)
    }

    pub fn insert_column(&mut self, table_id: &TableId, column: Column) -> Result<()> {
        let table = self.table_mut(table_id)?;
        if table.has_column(&column.id) {
            return Err(EngineError::invariant(
                "schema_duplicate_column_id",
                "Column ids must be unique within a table",
                anyhow!("column id {} already exists on {}", column.id, table_id),
            ));
        }
        if table.columns.iter().any(|c| c.name == column.name) {
            return Err(EngineError::invariant(
                "schema_duplicate_column_name",
                "Column names must be unique within a table",
                anyhow!("column {} already exists on {}", column.name, table_id),
            ));
        }
        table.columns.push(column);
        Ok(())
    }

    /// Applies column changes and returns the column's id afterwards.
    ///
    /// A changed id is propagated to every foreign key mapping and edge payload that
    /// referenced the old one; edge ids and handles keep the id they were created with.
    pub fn update_column(
        &mut self,
        table_id: &TableId,
        column_id: &ColumnId,
        changes: &ColumnChanges,
    ) -> Result<ColumnId> {
        let rekey = changes.id.clone().filter(|new_id| new_id != column_id);
        let renamed = changes.name.as_deref().map(str::trim);
        if renamed.is_some_and(str::is_empty) {
            return Err(EngineError::invariant(
                "column_name_empty",
                "Column name is required",
                anyhow!("column {column_id} on {table_id} would have an empty name"),
            ));
        }
        {
            let table = self.table_mut(table_id)?;
            if let Some(new_id) = &rekey {
                if table.has_column(new_id) {
                    return Err(EngineError::invariant(
                        "schema_duplicate_column_id",
                        "Column ids must be unique within a table",
                        anyhow!("column id {new_id} already exists on {table_id}"),
                    ));
                }
            }
            if let Some(name) = renamed {
                if table
                    .columns
                    .iter()
                    .any(|c| &c.id != column_id && c.name == name)
                {
                    return Err(EngineError::invariant(
                        "schema_duplicate_column_name",
                        "Column names must be unique within a table",
                        anyhow!("column {name} already exists on {table_id}"),
                    ));
                }
            }

            let column = table
                .columns
                .iter_mut()
                .find(|c| &c.id == column_id)
                .ok_or_else(|| {
                    EngineError::not_found("column", column_id.as_str(), "Column not found")
                })?;
            if let Some(name) = renamed {
                column.name = name.to_string();
            }
            if let Some(data_type) = &changes.data_type {
                column.data_type = data_type.trim().to_string();
            }
            if let Some(primary_key) = changes.primary_key {
                column.primary_key = primary_key;
            }
            if let Some(computed) = changes.computed {
                column.computed = computed;
            }
            if let Some(nullable) = changes.nullable {
                column.nullable = nullable;
            }
            if let Some(new_id) = &rekey {
                column.id = new_id.clone();
            }
        }

        let Some(new_id) = rekey else {
            return Ok(column_id.clone());
        };
        let renames = ColumnRenameMap::from([(column_id.clone(), new_id.clone())]);
        self.rename_columns(table_id, &renames);
        Ok(new_id)
    }

    fn rename_columns(&mut self, table_id: &TableId, renames: &ColumnRenameMap) {
        for foreign_key in &mut self.foreign_keys {
            for mapping in &mut foreign_key.mappings {
                if &foreign_key.table_id == table_id {
                    if let Some(renamed) = renames.get(&mapping.column) {
                        mapping.column = renamed.clone();
                    }
                }
                if &foreign_key.referenced_table_id == table_id {
                    if let Some(renamed) = renames.get(&mapping.referenced_column) {
                        mapping.referenced_column = renamed.clone();
                    }
                }
            }
        }

        let outgoing =
            apply_column_renames_to_outgoing_foreign_key_edges(&mut self.edges, table_id, renames);
        let incoming =
            apply_column_renames_to_incoming_foreign_key_edges(&mut self.edges, table_id, renames);
        tracing::debug!(
            table_id = %table_id,
            outgoing,
            incoming,
            "propagated column renames to edges"
        );
    }

    /// Removes a column unless a foreign key outside `tolerated` still references it.
    pub fn remove_column(
        &mut self,
        table_id: &TableId,
        column_id: &ColumnId,
        tolerated: &HashSet<ForeignKeyId>,
    ) -> Result<Column> {
        if let Some(blocking) = self
            .foreign_keys_referencing(table_id, column_id)
            .find(|fk| !tolerated.contains(&fk.id))
        {
            return Err(EngineError::invariant(
                "column_referenced_by_foreign_key",
                "Column is still referenced by a foreign key",
                anyhow!(
                    "column {column_id} on {table_id} is used by foreign key {} ({})",
                    blocking.name,
                    blocking.id
                ),
            ));
        }

        let table = self.table_mut(table_id)?;
        let position = table
            .columns
            .iter()
            .position(|c| &c.id == column_id)
            .ok_or_else(|| EngineError::not_found("column", column_id.as_str(), "Column not found"))?;
        Ok(table.columns.remove(position))
    }

    fn check_foreign_key(&self, foreign_key: &ForeignKey) -> Result<()> {
        let duplicate_name = self.foreign_keys.iter().any(|fk| {
            fk.id != foreign_key.id
                && fk.table_id == foreign_key.table_id
                && fk.name == foreign_key.name
        });
        if duplicate_name {
            return Err(EngineError::invariant(
                "foreign_key_duplicate_name",
                "Foreign key names must be unique within a table",
                anyhow!(
                    "foreign key {} already exists on {}",
                    foreign_key.name,
                    foreign_key.table_id
                ),
            ));
        }
        invariants::ensure_foreign_key_invariants(foreign_key, &self.tables)
    }

    fn attach_edges(&mut self, foreign_key: &ForeignKey) -> Result<()> {
        let created = foreign_key_edges(foreign_key);
        {
            let mut known: HashSet<&str> = self.edges.iter().map(|e| e.id.as_str()).collect();
            for edge in &created {
                if !known.insert(edge.id.as_str()) {
                    return Err(EngineError::identity_collision(
                        &edge.id,
                        anyhow!(
                            "edge id {} derived from foreign key {} is already in use",
                            edge.id,
                            foreign_key.id
                        ),
                    ));
                }
            }
        }
        self.edges.extend(created);
        Ok(())
    }

    pub fn insert_foreign_key(&mut self, foreign_key: ForeignKey) -> Result<()> {
        if self.foreign_key(&foreign_key.id).is_some() {
            return Err(EngineError::invariant(
                "schema_duplicate_foreign_key_id",
                "Foreign key ids must be unique",
                anyhow!("foreign key id {} already exists", foreign_key.id),
            ));
        }
        self.check_foreign_key(&foreign_key)?;
        self.attach_edges(&foreign_key)?;
        self.foreign_keys.push(foreign_key);
        Ok(())
    }

    /// Replaces a foreign key by id.
    ///
    /// With `reshape` the old edges are dropped and rebuilt from the new mappings;
    /// otherwise only the payload of the existing edges is refreshed.
    pub fn replace_foreign_key(&mut self, foreign_key: ForeignKey, reshape: bool) -> Result<()> {
        let position = self
            .foreign_keys
            .iter()
            .position(|fk| fk.id == foreign_key.id)
            .ok_or_else(|| {
                EngineError::not_found(
                    "foreign key",
                    foreign_key.id.as_str(),
                    "Foreign key not found",
                )
            })?;
        self.check_foreign_key(&foreign_key)?;

        if reshape {
            self.edges = remove_edges_for_foreign_key(mem::take(&mut self.edges), &foreign_key.id);
            self.attach_edges(&foreign_key)?;
        } else {
            let data = EdgeData::from_foreign_key(&foreign_key);
            for edge in self
                .edges
                .iter_mut()
                .filter(|edge| edge.foreign_key_id() == Some(&foreign_key.id))
            {
                edge.data = Some(data.clone());
            }
        }

        self.foreign_keys[position] = foreign_key;
        Ok(())
    }

    pub fn remove_foreign_key(&mut self, foreign_key_id: &ForeignKeyId) -> Result<ForeignKey> {
        let position = self
            .foreign_keys
            .iter()
            .position(|fk| &fk.id == foreign_key_id)
            .ok_or_else(|| {
                EngineError::not_found(
                    "foreign key",
                    foreign_key_id.as_str(),
                    "Foreign key not found",
                )
            })?;
        self.edges = remove_edges_for_foreign_key(mem::take(&mut self.edges), foreign_key_id);
        Ok(self.foreign_keys.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::ReferentialAction;

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

    fn table(id: &str, columns: Vec<Column>) -> Table {
        Table {
            id: TableId::from(id),
            schema: "dbo".to_string(),
            name: id.to_string(),
            columns,
        }
    }

    fn orders_fk() -> ForeignKey {
        ForeignKey {
            id: ForeignKeyId::from("fk_orders_users"),
            name: "fk_orders_users".to_string(),
            table_id: TableId::from("orders"),
            referenced_table_id: TableId::from("users"),
            mappings: vec![ColumnMapping {
                column: ColumnId::from("c_user"),
                referenced_column: ColumnId::from("c_id"),
            }],
            on_delete_action: ReferentialAction::Cascade,
            on_update_action: ReferentialAction::NoAction,
        }
    }

    fn sample_graph() -> SchemaGraph {
        SchemaGraph::from_schema(Schema {
            version: 1,
            tables: vec![
                table("users", vec![column("c_id", "id")]),
                table(
                    "orders",
                    vec![column("c_order", "id"), column("c_user", "user_id")],
                ),
            ],
            foreign_keys: vec![orders_fk()],
        })
    }

    #[test]
    fn from_schema_projects_edges() {
        let graph = sample_graph();
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].id, "orders-users-c_user-c_id");
        graph.ensure_invariants().expect("sample is consistent");
    }

    #[test]
    fn resolve_table_by_id_name_or_qualified_name() {
        let graph = sample_graph();
        assert_eq!(
            graph.resolve_table("orders").expect("by id").id.as_str(),
            "orders"
        );
        assert_eq!(
            graph.resolve_table("dbo.users").expect("qualified").id.as_str(),
            "users"
        );
        let err = graph.resolve_table("nope").expect_err("unknown");
        assert_eq!(err.code, "reference_not_found");
    }

    #[test]
    fn remove_table_cascades_foreign_keys_and_edges() {
        let mut graph = sample_graph();
        let removed = graph
            .remove_table(&TableId::from("users"))
            .expect("table exists");

        assert_eq!(removed, vec![ForeignKeyId::from("fk_orders_users")]);
        assert!(graph.foreign_keys().is_empty());
        assert!(graph.edges().is_empty());
        graph.ensure_invariants().expect("still consistent");
    }

    #[test]
    fn remove_column_refuses_referenced_columns() {
        let mut graph = sample_graph();
        let err = graph
            .remove_column(
                &TableId::from("orders"),
                &ColumnId::from("c_user"),
                &HashSet::new(),
            )
            .expect_err("column is referenced");
        assert_eq!(err.code, "column_referenced_by_foreign_key");

        let tolerated = HashSet::from([ForeignKeyId::from("fk_orders_users")]);
        graph
            .remove_column(&TableId::from("orders"), &ColumnId::from("c_user"), &tolerated)
            .expect("tolerated foreign key");
    }

    #[test]
    fn rekeying_a_column_keeps_handles_and_edge_ids() {
        let mut graph = sample_graph();
        let before = graph.edges()[0].clone();

        let new_id = graph
            .update_column(
                &TableId::from("users"),
                &ColumnId::from("c_id"),
                &ColumnChanges {
                    id: Some(ColumnId::from("c_user_key")),
                    name: Some("user_key".to_string()),
                    ..ColumnChanges::default()
                },
            )
            .expect("rekey succeeds");

        assert_eq!(new_id.as_str(), "c_user_key");
        let edge = &graph.edges()[0];
        assert_eq!(edge.id, before.id);
        assert_eq!(edge.target_handle, before.target_handle);
        assert_eq!(
            edge.data.as_ref().expect("data").referenced_columns_ids,
            vec![ColumnId::from("c_user_key")]
        );
        assert_eq!(
            graph.foreign_keys()[0].mappings[0].referenced_column.as_str(),
            "c_user_key"
        );
        graph.ensure_invariants().expect("projection in sync");
    }

    #[test]
    fn column_renames_are_trimmed_and_must_not_be_empty() {
        let mut graph = sample_graph();
        let users = TableId::from("users");
        let id = ColumnId::from("c_id");

        let err = graph
            .update_column(
                &users,
                &id,
                &ColumnChanges {
                    name: Some("   ".to_string()),
                    ..ColumnChanges::default()
                },
            )
            .expect_err("blank name");
        assert_eq!(err.code, "column_name_empty");
        assert_eq!(graph.table(&users).expect("users").columns[0].name, "id");

        graph
            .update_column(
                &users,
                &id,
                &ColumnChanges {
                    name: Some("  user_id ".to_string()),
                    ..ColumnChanges::default()
                },
            )
            .expect("padded name is trimmed");
        assert_eq!(graph.table(&users).expect("users").columns[0].name, "user_id");
    }

    #[test]
    fn reshaping_a_foreign_key_rebuilds_edges() {
        let mut graph = sample_graph();
        graph
            .insert_column(&TableId::from("orders"), column("c_buyer", "buyer_id"))
            .expect("column added");

        let mut updated = orders_fk();
        updated.mappings[0].column = ColumnId::from("c_buyer");
        graph
            .replace_foreign_key(updated, true)
            .expect("replace succeeds");

        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].id, "orders-users-c_buyer-c_id");
        assert_eq!(graph.edges()[0].source_handle, "right-c_buyer");
        graph.ensure_invariants().expect("projection in sync");
    }

    #[test]
    fn refreshing_a_foreign_key_keeps_edges() {
        let mut graph = sample_graph();
        let mut updated = orders_fk();
        updated.name = "fk_renamed".to_string();
        graph
            .replace_foreign_key(updated, false)
            .expect("replace succeeds");

        assert_eq!(graph.edges()[0].id, "orders-users-c_user-c_id");
        assert_eq!(
            graph.edges()[0].data.as_ref().expect("data").name,
            "fk_renamed"
        );
        graph.ensure_invariants().expect("projection in sync");
    }

    #[test]
    fn colliding_edge_ids_are_rejected() {
        let mut graph = sample_graph();
        let mut duplicate = orders_fk();
        duplicate.id = ForeignKeyId::from("fk_copy");
        duplicate.name = "fk_copy".to_string();

        let err = graph
            .insert_foreign_key(duplicate)
            .expect_err("same column pair derives the same edge id");
        assert_eq!(err.kind, ErrorKind::IdentityCollision);
        assert_eq!(graph.foreign_keys().len(), 1);
    }
}
