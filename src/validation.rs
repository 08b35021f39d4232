//! Closed-shape validation of raw edit objects.
//!
//! Every edit is checked against the field table of its `op` before it is decoded into an
//! [`EditOperation`]; the first problem found is reported together with the edit's index.

use std::fmt;

use anyhow::anyhow;
use serde_json::{Map, Value};

use crate::edits::{EditOpKind, EditOperation};
use crate::error::{EngineError, Result};

const OP_FIELD: &str = "op";

struct Shape {
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

impl Shape {
    fn allows(&self, field: &str) -> bool {
        self.required.contains(&field) || self.optional.contains(&field)
    }
}

const COLUMN_SPEC: Shape = Shape {
    required: &["name", "dataType"],
    optional: &["id", "primaryKey", "computed", "nullable"],
};

const MAPPING_SPEC: Shape = Shape {
    required: &["column", "referencedColumn"],
    optional: &[],
};

const FOREIGN_KEY_SPEC: Shape = Shape {
    required: &[
        "name",
        "referencedTable",
        "mappings",
        "onDeleteAction",
        "onUpdateAction",
    ],
    optional: &["id"],
};

const TABLE_CHANGES: Shape = Shape {
    required: &[],
    optional: &["name", "schema"],
};

const COLUMN_CHANGES: Shape = Shape {
    required: &[],
    optional: &[
        "id",
        "name",
        "dataType",
        "primaryKey",
        "computed",
        "nullable",
    ],
};

const FOREIGN_KEY_CHANGES: Shape = Shape {
    required: &[],
    optional: &[
        "name",
        "referencedTable",
        "mappings",
        "onDeleteAction",
        "onUpdateAction",
    ],
};

const fn edit_shape(kind: EditOpKind) -> Shape {
    match kind {
        EditOpKind::AddTable => Shape {
            required: &["table", "initialColumns"],
            optional: &["name", "schema"],
        },
        EditOpKind::SetTable => Shape {
            required: &["table", "set"],
            optional: &[],
        },
        EditOpKind::DropTable => Shape {
            required: &["table"],
            optional: &[],
        },
        EditOpKind::AddColumn => Shape {
            required: &["table", "column"],
            optional: &[],
        },
        EditOpKind::SetColumn => Shape {
            required: &["table", "column", "set"],
            optional: &[],
        },
        EditOpKind::DropColumn => Shape {
            required: &["table", "column"],
            optional: &[],
        },
        EditOpKind::AddForeignKey => Shape {
            required: &["table", "foreignKey"],
            optional: &[],
        },
        EditOpKind::SetForeignKey => Shape {
            required: &["table", "foreignKey", "set"],
            optional: &[],
        },
        EditOpKind::DropForeignKey => Shape {
            required: &["table", "foreignKey"],
            optional: &[],
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    NotAnObject { path: String },
    MissingOp,
    UnknownOp { op: String },
    MissingField { path: String },
    UnexpectedField { path: String },
    EmptyChanges { path: String },
    InvalidValue { path: String, message: String },
}

impl ShapeError {
    pub const fn code(&self) -> &'static str {
        match self {
            ShapeError::NotAnObject { .. } => "edit_not_object",
            ShapeError::MissingOp => "edit_missing_op",
            ShapeError::UnknownOp { .. } => "edit_unknown_op",
            ShapeError::MissingField { .. } => "edit_missing_field",
            ShapeError::UnexpectedField { .. } => "edit_unexpected_field",
            ShapeError::EmptyChanges { .. } => "edit_empty_changes",
            ShapeError::InvalidValue { .. } => "edit_invalid_value",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            ShapeError::NotAnObject { .. } => "Edit must be a JSON object",
            ShapeError::MissingOp => "Edit is missing the op field",
            ShapeError::UnknownOp { .. } => "Edit op is not recognized",
            ShapeError::MissingField { .. } => "Edit is missing a required field",
            ShapeError::UnexpectedField { .. } => "Edit contains a field that is not allowed",
            ShapeError::EmptyChanges { .. } => "Edit set object must change at least one field",
            ShapeError::InvalidValue { .. } => "Edit contains a value of the wrong type",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            ShapeError::NotAnObject { path }
            | ShapeError::MissingField { path }
            | ShapeError::UnexpectedField { path }
            | ShapeError::EmptyChanges { path }
            | ShapeError::InvalidValue { path, .. } => path,
            ShapeError::MissingOp | ShapeError::UnknownOp { .. } => OP_FIELD,
        }
    }

    pub fn into_engine_error(self, index: usize) -> EngineError {
        let code = self.code();
        let public = self.public_message();
        let path = self.path().to_string();
        EngineError::validation_with_code(code, public, path, anyhow!("{self}")).at_index(index)
    }
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeError::NotAnObject { path } if path.is_empty() => {
                write!(f, "edit is not an object")
            }
            ShapeError::NotAnObject { path } => write!(f, "`{path}` is not an object"),
            ShapeError::MissingOp => write!(f, "missing `op` discriminator"),
            ShapeError::UnknownOp { op } => write!(f, "unknown op `{op}`"),
            ShapeError::MissingField { path } => write!(f, "missing required field `{path}`"),
            ShapeError::UnexpectedField { path } => write!(f, "field `{path}` is not allowed"),
            ShapeError::EmptyChanges { path } => write!(f, "`{path}` has no fields to change"),
            ShapeError::InvalidValue { path, message } if path.is_empty() => {
                write!(f, "{message}")
            }
            ShapeError::InvalidValue { path, message } => write!(f, "`{path}`: {message}"),
        }
    }
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn as_object<'a>(
    value: &'a Value,
    path: &str,
) -> std::result::Result<&'a Map<String, Value>, ShapeError> {
    value.as_object().ok_or_else(|| ShapeError::NotAnObject {
        path: path.to_string(),
    })
}

fn check_fields(
    object: &Map<String, Value>,
    shape: &Shape,
    path: &str,
    skip: Option<&str>,
) -> std::result::Result<(), ShapeError> {
    if let Some(extra) = object
        .keys()
        .find(|key| Some(key.as_str()) != skip && !shape.allows(key.as_str()))
    {
        return Err(ShapeError::UnexpectedField {
            path: join(path, extra),
        });
    }
    if let Some(missing) = shape
        .required
        .iter()
        .find(|field| !object.contains_key(**field))
    {
        return Err(ShapeError::MissingField {
            path: join(path, missing),
        });
    }
    Ok(())
}

fn check_object<'a>(
    parent: &'a Map<String, Value>,
    field: &str,
    shape: &Shape,
    prefix: &str,
) -> std::result::Result<&'a Map<String, Value>, ShapeError> {
    let path = join(prefix, field);
    let value = parent
        .get(field)
        .ok_or_else(|| ShapeError::MissingField { path: path.clone() })?;
    let object = as_object(value, &path)?;
    check_fields(object, shape, &path, None)?;
    Ok(object)
}

fn check_changes<'a>(
    parent: &'a Map<String, Value>,
    shape: &Shape,
) -> std::result::Result<&'a Map<String, Value>, ShapeError> {
    let changes = check_object(parent, "set", shape, "")?;
    if changes.is_empty() {
        return Err(ShapeError::EmptyChanges {
            path: "set".to_string(),
        });
    }
    Ok(changes)
}

fn check_array(
    parent: &Map<String, Value>,
    field: &str,
    shape: &Shape,
    prefix: &str,
) -> std::result::Result<(), ShapeError> {
    let path = join(prefix, field);
    let Some(value) = parent.get(field) else {
        return Ok(());
    };
    let items = value.as_array().ok_or_else(|| ShapeError::InvalidValue {
        path: path.clone(),
        message: "expected an array".to_string(),
    })?;
    for (position, item) in items.iter().enumerate() {
        let item_path = format!("{path}[{position}]");
        let object = as_object(item, &item_path)?;
        check_fields(object, shape, &item_path, None)?;
    }
    Ok(())
}

fn check_nested(
    kind: EditOpKind,
    edit: &Map<String, Value>,
) -> std::result::Result<(), ShapeError> {
    match kind {
        EditOpKind::AddTable => check_array(edit, "initialColumns", &COLUMN_SPEC, ""),
        EditOpKind::SetTable => check_changes(edit, &TABLE_CHANGES).map(|_| ()),
        EditOpKind::AddColumn => check_object(edit, "column", &COLUMN_SPEC, "").map(|_| ()),
        EditOpKind::SetColumn => check_changes(edit, &COLUMN_CHANGES).map(|_| ()),
        EditOpKind::AddForeignKey => {
            let foreign_key = check_object(edit, "foreignKey", &FOREIGN_KEY_SPEC, "")?;
            check_array(foreign_key, "mappings", &MAPPING_SPEC, "foreignKey")
        }
        EditOpKind::SetForeignKey => {
            let changes = check_changes(edit, &FOREIGN_KEY_CHANGES)?;
            check_array(changes, "mappings", &MAPPING_SPEC, "set")
        }
        EditOpKind::DropTable | EditOpKind::DropColumn | EditOpKind::DropForeignKey => Ok(()),
    }
}

/// Checks one raw edit against the closed shape of its op and decodes it.
pub fn validate_edit(value: &Value) -> std::result::Result<EditOperation, ShapeError> {
    let edit = as_object(value, "")?;
    let op = match edit.get(OP_FIELD) {
        None => return Err(ShapeError::MissingOp),
        Some(Value::String(op)) => op,
        Some(other) => {
            return Err(ShapeError::UnknownOp {
                op: other.to_string(),
            });
        }
    };
    let kind = EditOpKind::from_tag(op).ok_or_else(|| ShapeError::UnknownOp { op: op.clone() })?;

    check_fields(edit, &edit_shape(kind), "", Some(OP_FIELD))?;
    check_nested(kind, edit)?;

    serde_json::from_value(value.clone()).map_err(|err| ShapeError::InvalidValue {
        path: String::new(),
        message: err.to_string(),
    })
}

/// Validates a whole batch before anything is applied.
pub fn validate_batch(edits: &[Value], max_edits: usize) -> Result<Vec<EditOperation>> {
    if edits.len() > max_edits {
        return Err(EngineError::validation(
            "Batch contains too many edits",
            anyhow!("batch has {} edits, limit is {}", edits.len(), max_edits),
        ));
    }

    edits
        .iter()
        .enumerate()
        .map(|(index, edit)| validate_edit(edit).map_err(|err| err.into_engine_error(index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::{ErrorDetails, ErrorKind};

    fn valid_foreign_key() -> Value {
        json!({
            "op": "add_foreign_key",
            "table": "orders",
            "foreignKey": {
                "name": "fk_orders_users",
                "referencedTable": "users",
                "mappings": [{"column": "user_id", "referencedColumn": "id"}],
                "onDeleteAction": "CASCADE",
                "onUpdateAction": "NO_ACTION"
            }
        })
    }

    #[test]
    fn accepts_each_kind() {
        let edits = vec![
            json!({"op": "add_table", "table": "t1", "initialColumns": []}),
            json!({"op": "set_table", "table": "t1", "set": {"name": "people"}}),
            json!({"op": "drop_table", "table": "t1"}),
            json!({"op": "add_column", "table": "t1", "column": {"name": "id", "dataType": "int"}}),
            json!({"op": "set_column", "table": "t1", "column": "id", "set": {"nullable": false}}),
            json!({"op": "drop_column", "table": "t1", "column": "id"}),
            valid_foreign_key(),
            json!({"op": "set_foreign_key", "table": "orders", "foreignKey": "fk", "set": {"onDeleteAction": "SET_NULL"}}),
            json!({"op": "drop_foreign_key", "table": "orders", "foreignKey": "fk"}),
        ];

        let operations = validate_batch(&edits, 100).expect("all edits are valid");
        let kinds = operations.iter().map(|op| op.kind()).collect::<Vec<_>>();
        assert_eq!(kinds, EditOpKind::ALL.to_vec());
    }

    #[test]
    fn rejects_flattened_foreign_key_fields() {
        let edits = vec![json!({
            "op": "add_foreign_key",
            "table": "t1",
            "foreignKeyColumn": "c1",
            "referencedColumn": "c2",
            "targetTable": "t2"
        })];

        let err = validate_batch(&edits, 100).expect_err("flattened fields are not allowed");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.index, Some(0));
        assert_eq!(err.code, "edit_unexpected_field");
    }

    #[test]
    fn rejects_flattened_fields_inside_foreign_key_descriptor() {
        let mut edit = valid_foreign_key();
        edit["foreignKey"]["constraintName"] = json!("fk");

        let err = validate_edit(&edit).expect_err("descriptor is closed");
        assert_eq!(
            err,
            ShapeError::UnexpectedField {
                path: "foreignKey.constraintName".to_string()
            }
        );
    }

    #[test]
    fn rejects_generic_columns_field_on_add_table() {
        let err = validate_edit(&json!({"op": "add_table", "table": "t1", "columns": []}))
            .expect_err("columns is not the creation field");
        assert_eq!(
            err,
            ShapeError::UnexpectedField {
                path: "columns".to_string()
            }
        );
    }

    #[test]
    fn reports_missing_required_fields() {
        let err = validate_edit(&json!({"op": "add_column", "table": "t1", "column": {"name": "x"}}))
            .expect_err("dataType is required");
        assert_eq!(
            err,
            ShapeError::MissingField {
                path: "column.dataType".to_string()
            }
        );

        let err = validate_edit(&json!({"op": "set_foreign_key", "table": "t1", "foreignKey": "fk"}))
            .expect_err("set is required");
        assert_eq!(
            err,
            ShapeError::MissingField {
                path: "set".to_string()
            }
        );
    }

    #[test]
    fn reports_unknown_and_missing_op() {
        assert_eq!(
            validate_edit(&json!({"op": "rename_table", "table": "t1"})),
            Err(ShapeError::UnknownOp {
                op: "rename_table".to_string()
            })
        );
        assert_eq!(
            validate_edit(&json!({"table": "t1"})),
            Err(ShapeError::MissingOp)
        );
        assert!(matches!(
            validate_edit(&json!(["add_table"])),
            Err(ShapeError::NotAnObject { .. })
        ));
    }

    #[test]
    fn checks_nested_mappings() {
        let mut edit = valid_foreign_key();
        edit["foreignKey"]["mappings"] = json!([{"column": "user_id"}]);
        assert_eq!(
            validate_edit(&edit),
            Err(ShapeError::MissingField {
                path: "foreignKey.mappings[0].referencedColumn".to_string()
            })
        );

        let set_edit = json!({
            "op": "set_foreign_key",
            "table": "orders",
            "foreignKey": "fk",
            "set": {"mappings": [{"column": "a", "referencedColumn": "b", "extra": 1}]}
        });
        assert_eq!(
            validate_edit(&set_edit),
            Err(ShapeError::UnexpectedField {
                path: "set.mappings[0].extra".to_string()
            })
        );
    }

    #[test]
    fn rejects_empty_set_objects() {
        assert_eq!(
            validate_edit(&json!({"op": "set_table", "table": "t1", "set": {}})),
            Err(ShapeError::EmptyChanges {
                path: "set".to_string()
            })
        );
    }

    #[test]
    fn reports_wrong_value_types() {
        let err = validate_edit(&json!({"op": "drop_table", "table": 7}))
            .expect_err("table must be a string");
        assert!(matches!(err, ShapeError::InvalidValue { .. }));

        let mut edit = valid_foreign_key();
        edit["foreignKey"]["onDeleteAction"] = json!("EXPLODE");
        assert!(matches!(
            validate_edit(&edit),
            Err(ShapeError::InvalidValue { .. })
        ));
    }

    #[test]
    fn reports_the_first_offending_index() {
        let edits = vec![
            json!({"op": "drop_table", "table": "t1"}),
            json!({"op": "drop_table", "table": "t2", "cascade": true}),
            json!({"op": "nope"}),
        ];
        let err = validate_batch(&edits, 100).expect_err("second edit is invalid");
        assert_eq!(err.index, Some(1));
        assert_eq!(
            err.details,
            Some(ErrorDetails::Field {
                path: "cascade".to_string()
            })
        );
    }

    #[test]
    fn enforces_batch_limit() {
        let edits = vec![json!({"op": "drop_table", "table": "t1"}); 3];
        let err = validate_batch(&edits, 2).expect_err("batch too large");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.index, None);
    }
}
