use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const DEFAULT_MAX_EDITS_PER_BATCH: usize = 500;
pub const DEFAULT_SCHEMA_NAME: &str = "dbo";

/// Runtime configuration for a [`crate::operations::SchemaEditor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    pub max_edits_per_batch: usize,
    /// Schema assigned by `add_table` when the edit does not name one.
    pub default_schema: String,
    pub allow_empty_batches: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_edits_per_batch: DEFAULT_MAX_EDITS_PER_BATCH,
            default_schema: DEFAULT_SCHEMA_NAME.to_string(),
            allow_empty_batches: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|err| {
            EngineError::validation("Engine configuration is invalid", anyhow!(err))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_edits_per_batch == 0 {
            return Err(EngineError::validation(
                "Engine configuration is invalid",
                anyhow!("maxEditsPerBatch must be at least 1"),
            ));
        }
        if self.default_schema.trim().is_empty() {
            return Err(EngineError::validation(
                "Engine configuration is invalid",
                anyhow!("defaultSchema must not be empty"),
            ));
        }
        Ok(())
    }
}
