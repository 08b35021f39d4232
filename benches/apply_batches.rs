use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};

use schema_graph::config::EngineConfig;
use schema_graph::edges::{ColumnRenameMap, apply_column_renames_to_incoming_foreign_key_edges};
use schema_graph::graph::SchemaGraph;
use schema_graph::models::{
    Column, ColumnId, ColumnMapping, ForeignKey, ForeignKeyId, ReferentialAction, Schema, Table,
    TableId,
};
use schema_graph::operations::SchemaEditor;
use schema_graph::validation::validate_batch;

fn lcg_next(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
    *state
}

fn table(idx: usize) -> Table {
    Table {
        id: TableId::new(format!("t{idx}")),
        schema: "dbo".to_string(),
        name: format!("table_{idx}"),
        columns: (0..4)
            .map(|col| Column {
                id: ColumnId::new(format!("t{idx}c{col}")),
                name: format!("col_{col}"),
                data_type: "int".to_string(),
                primary_key: col == 0,
                computed: false,
                nullable: col != 0,
            })
            .collect(),
    }
}

fn synthetic_schema(table_count: usize, foreign_key_count: usize) -> Schema {
    let tables = (0..table_count).map(table).collect::<Vec<_>>();

    let mut state = 0x1234_5678_9abc_def0u64;
    let mut foreign_keys = Vec::with_capacity(foreign_key_count);
    while foreign_keys.len() < foreign_key_count {
        let from = (lcg_next(&mut state) as usize) % table_count;
        let to = (lcg_next(&mut state) as usize) % table_count;
        if from == to {
            continue;
        }
        let idx = foreign_keys.len();
        let column = 1 + idx % 3;
        foreign_keys.push(ForeignKey {
            id: ForeignKeyId::new(format!("fk{idx}")),
            name: format!("fk_{idx}"),
            table_id: TableId::new(format!("t{from}")),
            referenced_table_id: TableId::new(format!("t{to}")),
            mappings: vec![ColumnMapping {
                column: ColumnId::new(format!("t{from}c{column}")),
                referenced_column: ColumnId::new(format!("t{to}c0")),
            }],
            on_delete_action: ReferentialAction::NoAction,
            on_update_action: ReferentialAction::NoAction,
        });
    }

    // Column pairs can repeat across random foreign keys; keep the first of each.
    let mut seen = std::collections::HashSet::new();
    foreign_keys.retain(|fk| {
        seen.insert((
            fk.table_id.clone(),
            fk.referenced_table_id.clone(),
            fk.mappings[0].column.clone(),
        ))
    });

    Schema {
        version: 1,
        tables,
        foreign_keys,
    }
}

fn rename_batch(table_count: usize, edits: usize) -> Vec<Value> {
    (0..edits)
        .map(|idx| {
            json!({
                "op": "set_column",
                "table": format!("t{}", idx % table_count),
                "column": "col_3",
                "set": {"dataType": format!("varchar({})", idx + 1)}
            })
        })
        .collect()
}

fn bench_validate_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_batch");
    for edits in [50usize, 500usize] {
        let batch = rename_batch(100, edits);
        group.throughput(Throughput::Elements(edits as u64));
        group.bench_with_input(BenchmarkId::new("set_column", edits), &batch, |b, batch| {
            b.iter(|| black_box(validate_batch(batch, 500)));
        });
    }
    group.finish();
}

fn bench_apply_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_batch");
    for (tables, foreign_keys) in [(200usize, 400usize), (1_000usize, 2_000usize)] {
        let schema = synthetic_schema(tables, foreign_keys);
        let batch = rename_batch(tables, 50);

        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("set_column", format!("{tables}t_{foreign_keys}fk")),
            &(schema, batch),
            |b, (schema, batch)| {
                b.iter_batched(
                    || {
                        SchemaEditor::load(schema.clone(), EngineConfig::default())
                            .expect("synthetic schema is consistent")
                    },
                    |mut editor| black_box(editor.apply_edits(1, batch)),
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_rename_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("rename_propagation");
    for (tables, foreign_keys) in [(200usize, 400usize), (1_000usize, 2_000usize)] {
        let graph = SchemaGraph::from_schema(synthetic_schema(tables, foreign_keys));
        let edges = graph.edges().to_vec();

        group.throughput(Throughput::Elements(edges.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("incoming", format!("{tables}t_{foreign_keys}fk")),
            &edges,
            |b, edges| {
                let mut state = 7u64;
                b.iter_batched(
                    || {
                        let idx = (lcg_next(&mut state) as usize) % tables;
                        let renames = ColumnRenameMap::from([(
                            ColumnId::new(format!("t{idx}c0")),
                            ColumnId::new(format!("t{idx}key")),
                        )]);
                        (edges.clone(), TableId::new(format!("t{idx}")), renames)
                    },
                    |(mut edges, table_id, renames)| {
                        black_box(apply_column_renames_to_incoming_foreign_key_edges(
                            &mut edges, &table_id, &renames,
                        ))
                    },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    apply_batches,
    bench_validate_batch,
    bench_apply_batch,
    bench_rename_propagation
);
criterion_main!(apply_batches);
