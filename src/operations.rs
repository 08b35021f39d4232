use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::edits::{ColumnSpec, EditOperation};
use crate::error::{EngineError, Rejection, Result};
use crate::graph::SchemaGraph;
use crate::models::{Column, ColumnId, ForeignKey, ForeignKeyId, Schema, SchemaSnapshot, Table, TableId};
use crate::{invariants, validation};

/// Tool-call friendly schema actions.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SchemaOperation {
    ApplyEdits { payload: ApplyEditsPayload },
    GetSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyEditsPayload {
    pub expected_version: u64,
    pub edits: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaResponse {
    pub version: u64,
    pub schema: SchemaSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SchemaOperationResult {
    Schema(SchemaResponse),
    Rejected { error: Rejection },
}

impl SchemaOperationResult {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SchemaOperationResult::Rejected { .. })
    }
}

impl From<Result<SchemaResponse>> for SchemaOperationResult {
    fn from(value: Result<SchemaResponse>) -> Self {
        match value {
            Ok(response) => SchemaOperationResult::Schema(response),
            Err(err) => SchemaOperationResult::Rejected {
                error: err.to_rejection(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Loaded { version: u64 },
    Committed { version: u64, edits: usize },
}

type Listener = Box<dyn Fn(&SchemaChange, &SchemaGraph) + Send + Sync>;

/// Single-writer holder of the authoritative schema.
///
/// Batches are checked against the current version, validated as a whole and applied to a
/// working copy; the copy replaces the model only if every edit and the final invariant
/// check succeed.
pub struct SchemaEditor {
    graph: SchemaGraph,
    version: u64,
    config: EngineConfig,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl fmt::Debug for SchemaEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEditor")
            .field("version", &self.version)
            .field("tables", &self.graph.tables().len())
            .field("foreign_keys", &self.graph.foreign_keys().len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SchemaEditor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            graph: SchemaGraph::default(),
            version: 0,
            config,
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn load(schema: Schema, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let mut editor = Self::new(config);
        editor.reload(schema)?;
        Ok(editor)
    }

    /// Replaces the model with a snapshot from an external source and adopts its version.
    pub fn reload(&mut self, schema: Schema) -> Result<()> {
        let version = schema.version;
        let graph = SchemaGraph::from_schema(schema);
        graph.ensure_invariants()?;

        self.graph = graph;
        self.version = version;
        tracing::info!(
            version,
            tables = self.graph.tables().len(),
            "schema loaded"
        );
        self.notify(&SchemaChange::Loaded { version });
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SchemaSnapshot {
        self.graph.snapshot(self.version)
    }

    pub fn schema(&self) -> Schema {
        self.snapshot().into_schema()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: Fn(&SchemaChange, &SchemaGraph) + Send + Sync + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn notify(&self, change: &SchemaChange) {
        for (_, listener) in &self.listeners {
            listener(change, &self.graph);
        }
    }

    pub fn execute(&mut self, operation: SchemaOperation) -> SchemaOperationResult {
        match operation {
            SchemaOperation::ApplyEdits { payload } => self
                .apply_edits(payload.expected_version, &payload.edits)
                .into(),
            SchemaOperation::GetSchema => SchemaOperationResult::Schema(self.response()),
        }
    }

    /// Parses and executes a raw request from the transport.
    pub fn handle_request(&mut self, request: Value) -> SchemaOperationResult {
        match serde_json::from_value::<SchemaOperation>(request) {
            Ok(operation) => self.execute(operation),
            Err(err) => {
                let err = EngineError::validation("Request is malformed", anyhow!(err));
                log_rejection(&err);
                SchemaOperationResult::Rejected {
                    error: err.to_rejection(),
                }
            }
        }
    }

    /// Validates and applies a batch of raw edits.
    pub fn apply_edits(&mut self, expected_version: u64, edits: &[Value]) -> Result<SchemaResponse> {
        let outcome = self.try_apply_edits(expected_version, edits);
        if let Err(err) = &outcome {
            log_rejection(err);
        }
        outcome
    }

    /// Applies already-typed edits under the same version guard and atomicity.
    pub fn apply_operations(
        &mut self,
        expected_version: u64,
        operations: Vec<EditOperation>,
    ) -> Result<SchemaResponse> {
        let outcome = self.try_apply_operations(expected_version, operations);
        if let Err(err) = &outcome {
            log_rejection(err);
        }
        outcome
    }

    fn try_apply_operations(
        &mut self,
        expected_version: u64,
        operations: Vec<EditOperation>,
    ) -> Result<SchemaResponse> {
        self.check_version(expected_version)?;
        self.check_batch_len(operations.len())?;
        self.commit(operations)
    }

    fn try_apply_edits(&mut self, expected_version: u64, edits: &[Value]) -> Result<SchemaResponse> {
        self.check_version(expected_version)?;
        self.check_batch_len(edits.len())?;
        let operations = validation::validate_batch(edits, self.config.max_edits_per_batch)?;
        self.commit(operations)
    }

    fn check_version(&self, expected_version: u64) -> Result<()> {
        if expected_version != self.version {
            return Err(EngineError::version_conflict(expected_version, self.version));
        }
        Ok(())
    }

    fn check_batch_len(&self, len: usize) -> Result<()> {
        if len == 0 && !self.config.allow_empty_batches {
            return Err(EngineError::validation(
                "Batch must contain at least one edit",
                anyhow!("empty edit batch"),
            ));
        }
        if len > self.config.max_edits_per_batch {
            return Err(EngineError::validation(
                "Batch contains too many edits",
                anyhow!(
                    "batch has {len} edits, limit is {}",
                    self.config.max_edits_per_batch
                ),
            ));
        }
        Ok(())
    }

    fn commit(&mut self, operations: Vec<EditOperation>) -> Result<SchemaResponse> {
        let next_version = self.version.checked_add(1).ok_or_else(|| {
            EngineError::invariant(
                "schema_version_exhausted",
                "Schema version cannot be advanced",
                anyhow!("version {} is already the largest representable", self.version),
            )
        })?;

        let mut working = self.graph.clone();
        let mut pending = PendingDrops::new();
        for (index, operation) in operations.iter().enumerate() {
            apply_operation(&mut working, operation, index, &mut pending, &self.config)
                .and_then(|()| settle_edit(&working, &mut pending))
                .map_err(|err| err.at_index(index))?;
            tracing::debug!(index, op = %operation.kind(), "applied schema edit");
        }
        ensure_no_pending_drops(&pending)?;
        working.ensure_invariants()?;

        self.graph = working;
        self.version = next_version;
        tracing::info!(
            version = self.version,
            edits = operations.len(),
            "schema edit batch committed"
        );
        self.notify(&SchemaChange::Committed {
            version: self.version,
            edits: operations.len(),
        });
        Ok(self.response())
    }

    fn response(&self) -> SchemaResponse {
        SchemaResponse {
            version: self.version,
            schema: self.snapshot(),
        }
    }
}

fn log_rejection(err: &EngineError) {
    tracing::warn!(
        kind = err.kind.as_str(),
        code = err.code,
        index = ?err.index,
        error = %err.source,
        "schema edit batch rejected"
    );
}

fn column_from_spec(spec: &ColumnSpec) -> Result<Column> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(EngineError::invariant(
            "column_name_empty",
            "Column name is required",
            anyhow!("column definition had an empty name"),
        ));
    }
    Ok(Column {
        id: spec.id.clone().unwrap_or_else(ColumnId::generate),
        name: name.to_string(),
        data_type: spec.data_type.trim().to_string(),
        primary_key: spec.primary_key,
        computed: spec.computed,
        nullable: spec.nullable,
    })
}

/// A column dropped while foreign keys still referenced it.
#[derive(Debug, Clone)]
struct PendingColumnDrop {
    index: usize,
    table_id: TableId,
    column_id: ColumnId,
}

/// Foreign keys left dangling by a `drop_column`, keyed by foreign key id.
///
/// An entry is cleared once the foreign key is gone or valid again.
type PendingDrops = HashMap<ForeignKeyId, PendingColumnDrop>;

/// Checks the working model after an edit.
///
/// Violations about foreign keys with a pending column drop are deferred; everything
/// else is charged to the edit that was just applied.
fn settle_edit(graph: &SchemaGraph, pending: &mut PendingDrops) -> Result<()> {
    let mut unresolved = HashSet::new();
    let mut blocking = Vec::new();
    for violation in graph.invariant_violations() {
        let deferred = violation
            .foreign_key_id()
            .filter(|id| pending.contains_key(*id))
            .cloned();
        match deferred {
            Some(foreign_key_id) => {
                unresolved.insert(foreign_key_id);
            }
            None => blocking.push(violation),
        }
    }
    if let Some(err) = invariants::violations_error(&blocking) {
        return Err(err);
    }

    pending.retain(|foreign_key_id, _| unresolved.contains(foreign_key_id));
    Ok(())
}

fn ensure_no_pending_drops(pending: &PendingDrops) -> Result<()> {
    let earliest = pending.iter().min_by_key(|(_, column_drop)| column_drop.index);
    let Some((foreign_key_id, column_drop)) = earliest else {
        return Ok(());
    };
    Err(EngineError::invariant(
        "column_referenced_by_foreign_key",
        "Column is still referenced by a foreign key",
        anyhow!(
            "column {} on {} was dropped but foreign key {} still uses it",
            column_drop.column_id,
            column_drop.table_id,
            foreign_key_id
        ),
    )
    .at_index(column_drop.index))
}

fn apply_operation(
    graph: &mut SchemaGraph,
    operation: &EditOperation,
    index: usize,
    pending: &mut PendingDrops,
    config: &EngineConfig,
) -> Result<()> {
    match operation {
        EditOperation::AddTable {
            table,
            name,
            schema,
            initial_columns,
        } => {
            let id = table.trim();
            if id.is_empty() {
                return Err(EngineError::invariant(
                    "table_id_empty",
                    "Table id is required",
                    anyhow!("add_table had an empty table id"),
                ));
            }
            let columns = initial_columns
                .iter()
                .map(column_from_spec)
                .collect::<Result<Vec<_>>>()?;
            graph.insert_table(Table {
                id: TableId::new(id),
                schema: schema
                    .clone()
                    .unwrap_or_else(|| config.default_schema.clone()),
                name: name.clone().unwrap_or_else(|| id.to_string()),
                columns,
            })
        }
        EditOperation::SetTable { table, set } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            graph.update_table(&table_id, set)
        }
        EditOperation::DropTable { table } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let cascaded = graph.remove_table(&table_id)?;
            tracing::debug!(table_id = %table_id, cascaded = cascaded.len(), "dropped table");
            Ok(())
        }
        EditOperation::AddColumn { table, column } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            graph.insert_column(&table_id, column_from_spec(column)?)
        }
        EditOperation::SetColumn { table, column, set } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let column_id = graph.resolve_column(&table_id, column)?.id.clone();
            graph.update_column(&table_id, &column_id, set).map(|_| ())
        }
        EditOperation::DropColumn { table, column } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let column_id = graph.resolve_column(&table_id, column)?.id.clone();
            let referencing = graph
                .foreign_keys_referencing(&table_id, &column_id)
                .map(|fk| fk.id.clone())
                .collect::<HashSet<_>>();
            graph.remove_column(&table_id, &column_id, &referencing)?;
            for foreign_key_id in referencing {
                pending
                    .entry(foreign_key_id)
                    .or_insert_with(|| PendingColumnDrop {
                        index,
                        table_id: table_id.clone(),
                        column_id: column_id.clone(),
                    });
            }
            Ok(())
        }
        EditOperation::AddForeignKey { table, foreign_key } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let referenced_table_id = graph.resolve_table(&foreign_key.referenced_table)?.id.clone();
            let mappings =
                graph.resolve_mappings(&table_id, &referenced_table_id, &foreign_key.mappings)?;
            graph.insert_foreign_key(ForeignKey {
                id: foreign_key
                    .id
                    .clone()
                    .unwrap_or_else(ForeignKeyId::generate),
                name: foreign_key.name.trim().to_string(),
                table_id,
                referenced_table_id,
                mappings,
                on_delete_action: foreign_key.on_delete_action,
                on_update_action: foreign_key.on_update_action,
            })
        }
        EditOperation::SetForeignKey {
            table,
            foreign_key,
            set,
        } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let mut updated = graph.resolve_foreign_key(&table_id, foreign_key)?.clone();
            if let Some(referenced) = &set.referenced_table {
                updated.referenced_table_id = graph.resolve_table(referenced)?.id.clone();
            }
            if let Some(mappings) = &set.mappings {
                updated.mappings =
                    graph.resolve_mappings(&table_id, &updated.referenced_table_id, mappings)?;
            }
            if let Some(name) = &set.name {
                updated.name = name.trim().to_string();
            }
            if let Some(action) = set.on_delete_action {
                updated.on_delete_action = action;
            }
            if let Some(action) = set.on_update_action {
                updated.on_update_action = action;
            }
            graph.replace_foreign_key(updated, set.reshapes_edges())
        }
        EditOperation::DropForeignKey { table, foreign_key } => {
            let table_id = graph.resolve_table(table)?.id.clone();
            let foreign_key_id = graph.resolve_foreign_key(&table_id, foreign_key)?.id.clone();
            graph.remove_foreign_key(&foreign_key_id).map(|_| ())
        }
    }
}
