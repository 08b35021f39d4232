use std::collections::{HashMap, HashSet};

use anyhow::anyhow;

use crate::edges::{Edge, EdgeData};
use crate::error::{EngineError, Result};
use crate::models::{
    ColumnId, ForeignKey, ForeignKeyId, ReferentialAction, SchemaInvariantViolation, Table,
    TableId,
};

pub fn schema_invariant_violations(
    tables: &[Table],
    foreign_keys: &[ForeignKey],
    edges: &[Edge],
) -> Vec<SchemaInvariantViolation> {
    let mut violations = Vec::new();

    let mut table_lookup: HashMap<&TableId, &Table> = HashMap::with_capacity(tables.len());
    let mut qualified_names = HashSet::with_capacity(tables.len());
    for table in tables {
        if table_lookup.insert(&table.id, table).is_some() {
            violations.push(SchemaInvariantViolation::DuplicateTableId {
                table_id: table.id.clone(),
            });
        }
        if !qualified_names.insert((table.schema.as_str(), table.name.as_str())) {
            violations.push(SchemaInvariantViolation::DuplicateTableName {
                schema: table.schema.clone(),
                name: table.name.clone(),
            });
        }

        let mut column_ids = HashSet::with_capacity(table.columns.len());
        let mut column_names = HashSet::with_capacity(table.columns.len());
        for column in &table.columns {
            if !column_ids.insert(&column.id) {
                violations.push(SchemaInvariantViolation::DuplicateColumnId {
                    table_id: table.id.clone(),
                    column_id: column.id.clone(),
                });
            }
            if !column_names.insert(column.name.as_str()) {
                violations.push(SchemaInvariantViolation::DuplicateColumnName {
                    table_id: table.id.clone(),
                    name: column.name.clone(),
                });
            }
        }
    }

    let mut fk_lookup: HashMap<&ForeignKeyId, &ForeignKey> =
        HashMap::with_capacity(foreign_keys.len());
    for foreign_key in foreign_keys {
        if fk_lookup.insert(&foreign_key.id, foreign_key).is_some() {
            violations.push(SchemaInvariantViolation::DuplicateForeignKeyId {
                foreign_key_id: foreign_key.id.clone(),
            });
        }
        foreign_key_violations(foreign_key, &table_lookup, &mut violations);
    }

    let mut edge_ids = HashSet::with_capacity(edges.len());
    let mut edge_counts: HashMap<&ForeignKeyId, usize> = HashMap::with_capacity(fk_lookup.len());
    for edge in edges {
        if !edge_ids.insert(edge.id.as_str()) {
            violations.push(SchemaInvariantViolation::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }

        let Some(foreign_key) = edge
            .foreign_key_id()
            .and_then(|fk_id| fk_lookup.get(fk_id).copied())
        else {
            violations.push(SchemaInvariantViolation::OrphanEdge {
                edge_id: edge.id.clone(),
            });
            continue;
        };
        *edge_counts.entry(&foreign_key.id).or_insert(0) += 1;

        let in_sync = edge.source == foreign_key.table_id
            && edge.target == foreign_key.referenced_table_id
            && edge.data.as_ref() == Some(&EdgeData::from_foreign_key(foreign_key));
        if !in_sync {
            violations.push(SchemaInvariantViolation::StaleEdgeData {
                edge_id: edge.id.clone(),
                foreign_key_id: foreign_key.id.clone(),
            });
        }
    }

    for foreign_key in foreign_keys {
        let actual = edge_counts.get(&foreign_key.id).copied().unwrap_or(0);
        if actual != foreign_key.mappings.len() {
            violations.push(SchemaInvariantViolation::EdgeCountMismatch {
                foreign_key_id: foreign_key.id.clone(),
                expected: foreign_key.mappings.len(),
                actual,
            });
        }
    }

    violations
}

fn foreign_key_violations(
    foreign_key: &ForeignKey,
    tables: &HashMap<&TableId, &Table>,
    violations: &mut Vec<SchemaInvariantViolation>,
) {
    if foreign_key.mappings.is_empty() {
        violations.push(SchemaInvariantViolation::EmptyMappings {
            foreign_key_id: foreign_key.id.clone(),
        });
    }

    let mut seen_columns: HashSet<&ColumnId> = HashSet::with_capacity(foreign_key.mappings.len());
    for mapping in &foreign_key.mappings {
        if !seen_columns.insert(&mapping.column) {
            violations.push(SchemaInvariantViolation::DuplicateMappingColumn {
                foreign_key_id: foreign_key.id.clone(),
                column_id: mapping.column.clone(),
            });
        }
    }

    let owning = tables.get(&foreign_key.table_id).copied();
    let referenced = tables.get(&foreign_key.referenced_table_id).copied();
    for (table_id, table) in [
        (&foreign_key.table_id, owning),
        (&foreign_key.referenced_table_id, referenced),
    ] {
        if table.is_none() {
            violations.push(SchemaInvariantViolation::UnknownTableReference {
                foreign_key_id: foreign_key.id.clone(),
                table_id: table_id.clone(),
            });
        }
    }

    let sets_null = foreign_key.on_delete_action == ReferentialAction::SetNull
        || foreign_key.on_update_action == ReferentialAction::SetNull;
    for mapping in &foreign_key.mappings {
        if let Some(owning) = owning {
            match owning.column(&mapping.column) {
                None => violations.push(SchemaInvariantViolation::UnknownColumnReference {
                    foreign_key_id: foreign_key.id.clone(),
                    table_id: owning.id.clone(),
                    column_id: mapping.column.clone(),
                }),
                Some(column) if sets_null && !column.nullable => {
                    violations.push(SchemaInvariantViolation::SetNullOnRequiredColumn {
                        foreign_key_id: foreign_key.id.clone(),
                        column_id: column.id.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        if let Some(referenced) = referenced {
            if !referenced.has_column(&mapping.referenced_column) {
                violations.push(SchemaInvariantViolation::UnknownColumnReference {
                    foreign_key_id: foreign_key.id.clone(),
                    table_id: referenced.id.clone(),
                    column_id: mapping.referenced_column.clone(),
                });
            }
        }
    }
}

/// Checks a single foreign key against the tables it would connect.
pub fn ensure_foreign_key_invariants(foreign_key: &ForeignKey, tables: &[Table]) -> Result<()> {
    let table_lookup: HashMap<&TableId, &Table> =
        tables.iter().map(|table| (&table.id, table)).collect();
    let mut violations = Vec::new();
    foreign_key_violations(foreign_key, &table_lookup, &mut violations);

    match violations.first() {
        None => Ok(()),
        Some(first) => Err(EngineError::invariant(
            first.error_code(),
            first.public_message(),
            anyhow!(
                "foreign key {} ({}) is invalid: {:?}",
                foreign_key.name,
                foreign_key.id,
                violations
            ),
        )),
    }
}

pub fn ensure_schema_invariants(
    tables: &[Table],
    foreign_keys: &[ForeignKey],
    edges: &[Edge],
) -> Result<()> {
    let violations = schema_invariant_violations(tables, foreign_keys, edges);
    match violations_error(&violations) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Builds the error for a list of violations, classified by the first one.
pub fn violations_error(violations: &[SchemaInvariantViolation]) -> Option<EngineError> {
    let first = violations.first()?;
    let source = anyhow!("schema invariant validation failed: {:?}", violations);
    if let SchemaInvariantViolation::DuplicateEdgeId { edge_id } = first {
        return Some(EngineError::identity_collision(edge_id, source));
    }
    Some(EngineError::invariant(
        first.error_code(),
        first.public_message(),
        source,
    ))
}
