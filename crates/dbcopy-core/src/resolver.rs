//! Natural-key lookup in a destination store.
//!
//! Lookups never use a source id. A digest is preferred whenever one is
//! known; a name lookup that matches more than one row logs a warning and
//! returns the first match.

use model_store::{ModelId, ModelRow, ModelStore, RunRow, TaskRow, WorksetRow};
use tracing::warn;

use crate::error::Result;

pub struct Resolver<'a> {
    store: &'a dyn ModelStore,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn ModelStore) -> Self {
        Self { store }
    }

    /// Find a model by digest, or by name when no digest is given.
    pub async fn model(&self, name: &str, digest: Option<&str>) -> Result<Option<ModelRow>> {
        if let Some(digest) = digest {
            let found = self.store.find_model_by_digest(digest).await?;
            if let Some(row) = &found {
                if !name.is_empty() && row.def.name != name {
                    warn!(
                        digest,
                        expected = name,
                        found = %row.def.name,
                        "model digest matches a model with another name"
                    );
                }
            }
            return Ok(found);
        }
        let rows = self.store.find_models_by_name(name).await?;
        if rows.len() > 1 {
            warn!(model = name, count = rows.len(), "model name is ambiguous, using the first");
        }
        Ok(rows.into_iter().next())
    }

    pub async fn run(
        &self,
        model_id: ModelId,
        name: &str,
        digest: Option<&str>,
    ) -> Result<Option<RunRow>> {
        if let Some(digest) = digest {
            return Ok(self.store.find_run_by_digest(model_id, digest).await?);
        }
        let rows = self.store.find_runs_by_name(model_id, name).await?;
        if rows.len() > 1 {
            warn!(run = name, count = rows.len(), "run has no digest and its name is ambiguous, using the first");
        }
        Ok(rows.into_iter().next())
    }

    pub async fn workset(&self, model_id: ModelId, name: &str) -> Result<Option<WorksetRow>> {
        Ok(self.store.find_workset_by_name(model_id, name).await?)
    }

    pub async fn task(&self, model_id: ModelId, name: &str) -> Result<Option<TaskRow>> {
        Ok(self.store.find_task_by_name(model_id, name).await?)
    }
}
