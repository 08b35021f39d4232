use std::fmt;

use anyhow::anyhow;
use serde::Serialize;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    VersionConflict,
    #[serde(rename = "validation_error")]
    Validation,
    InvariantViolation,
    IdentityCollision,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::Validation => "validation_error",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::IdentityCollision => "identity_collision",
        }
    }
}

/// Structured context attached to an error, suitable for returning to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorDetails {
    VersionConflict { expected: u64, current: u64 },
    Field { path: String },
    Reference { entity: &'static str, reference: String },
    EdgeId { edge_id: String },
}

#[derive(Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    /// Position of the offending edit in the submitted batch.
    pub index: Option<usize>,
    pub details: Option<ErrorDetails>,
    pub source: anyhow::Error,
}

impl EngineError {
    pub fn version_conflict(expected: u64, current: u64) -> Self {
        Self {
            kind: ErrorKind::VersionConflict,
            code: "version_conflict",
            public: "Schema version has changed since the batch was prepared",
            index: None,
            details: Some(ErrorDetails::VersionConflict { expected, current }),
            source: anyhow!("expected version {expected}, current version is {current}"),
        }
    }

    pub fn validation(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Validation,
            code: "validation_error",
            public,
            index: None,
            details: None,
            source,
        }
    }

    pub fn validation_with_code(
        code: &'static str,
        public: &'static str,
        path: String,
        source: anyhow::Error,
    ) -> Self {
        Self {
            kind: ErrorKind::Validation,
            code,
            public,
            index: None,
            details: Some(ErrorDetails::Field { path }),
            source,
        }
    }

    pub fn invariant(code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvariantViolation,
            code,
            public,
            index: None,
            details: None,
            source,
        }
    }

    pub fn not_found(entity: &'static str, reference: &str, public: &'static str) -> Self {
        Self {
            kind: ErrorKind::InvariantViolation,
            code: "reference_not_found",
            public,
            index: None,
            details: Some(ErrorDetails::Reference {
                entity,
                reference: reference.to_string(),
            }),
            source: anyhow!("{entity} {reference:?} does not exist"),
        }
    }

    pub fn identity_collision(edge_id: &str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::IdentityCollision,
            code: "edge_identity_collision",
            public: "Two edges resolve to the same derived identity",
            index: None,
            details: Some(ErrorDetails::EdgeId {
                edge_id: edge_id.to_string(),
            }),
            source,
        }
    }

    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Public message followed by the underlying cause.
    pub fn message(&self) -> String {
        format!("{}: {}", self.public, self.source)
    }

    pub fn to_rejection(&self) -> Rejection {
        Rejection {
            kind: self.kind,
            code: self.code,
            index: self.index,
            message: self.message(),
            details: self.details.clone(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "edit {index}: {}", self.message()),
            None => f.write_str(&self.message()),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wire form of a rejected request.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}
