use serde::Deserialize;

use crate::docstore::constants::{DEFAULT_DATABASE_ID, MAX_BATCH_WRITES};
use crate::docstore::environment::RuntimeEnvironment;
use crate::docstore::error::{invalid_argument, DocstoreResult};
use crate::docstore::model::DatabaseId;

const DEFAULT_PROJECT_ID: &str = "docwire-local";

/// Construction-time settings of a [`Docstore`](super::Docstore).
///
/// Every field has a default, so a partial JSON document such as
/// `{"projectId": "demo", "environment": "client"}` is a complete
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocstoreOptions {
    pub project_id: String,
    pub database: String,
    pub environment: RuntimeEnvironment,
    /// Largest number of mutations a single batch may record.
    pub max_batch_writes: usize,
}

impl Default for DocstoreOptions {
    fn default() -> Self {
        Self {
            project_id: DEFAULT_PROJECT_ID.to_string(),
            database: DEFAULT_DATABASE_ID.to_string(),
            environment: RuntimeEnvironment::default(),
            max_batch_writes: MAX_BATCH_WRITES,
        }
    }
}

impl DocstoreOptions {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_environment(mut self, environment: RuntimeEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_max_batch_writes(mut self, max_batch_writes: usize) -> Self {
        self.max_batch_writes = max_batch_writes;
        self
    }

    pub fn from_json(json: &str) -> DocstoreResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|err| invalid_argument(format!("Invalid docstore options: {err}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> DocstoreResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(invalid_argument("projectId cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(invalid_argument("database cannot be empty"));
        }
        if self.max_batch_writes == 0 {
            return Err(invalid_argument("maxBatchWrites must be at least 1"));
        }
        Ok(())
    }

    pub fn database_id(&self) -> DatabaseId {
        DatabaseId::new(self.project_id.clone(), self.database.clone())
    }
}
