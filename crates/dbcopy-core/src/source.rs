//! Where portable entities are read from.
//!
//! A [`PortableSource`] yields entities already projected to the portable
//! form, together with their owned value tables. The database source reads
//! a [`ModelStore`]; the text repository in [`crate::text`] reads JSON and
//! CSV files. Copiers only see this trait, so database-to-database and
//! text-to-database copies share one path.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use model_store::{
    EntityDef, MicroCell, ModelDef, ModelId, ModelStore, ParamCell, ParamDef, RunId, SetId,
    TableDef, TableValues, SCHEMA_VERSION,
};
use tracing::warn;

use crate::error::{CopyError, Result};
use crate::portable::{
    project_task_run, PublicRun, PublicTask, PublicWorkset, RunEntry, TaskEntry, WorksetEntry,
};
use crate::resolver::Resolver;

/// Selects a model by digest, by name, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelector {
    pub name: Option<String>,
    pub digest: Option<String>,
}

impl ModelSelector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            digest: None,
        }
    }

    pub fn by_digest(digest: impl Into<String>) -> Self {
        Self {
            name: None,
            digest: Some(digest.into()),
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub(crate) fn require_any(&self) -> Result<()> {
        if self.name.is_none() && self.digest.is_none() {
            return Err(CopyError::Config(
                "a model name or digest is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, &self.digest) {
            (Some(name), Some(digest)) => write!(f, "{name} (digest {digest})"),
            (Some(name), None) => f.write_str(name),
            (None, Some(digest)) => write!(f, "digest {digest}"),
            (None, None) => f.write_str("<any>"),
        }
    }
}

/// Selects one run of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelector {
    Name(String),
    Digest(String),
    First,
    Last,
}

impl RunSelector {
    /// Pick the selected run from runs in source order.
    pub fn pick(&self, runs: Vec<RunEntry>) -> Result<RunEntry> {
        let picked = match self {
            RunSelector::First => runs.into_iter().next(),
            RunSelector::Last => runs.into_iter().next_back(),
            RunSelector::Digest(digest) => runs
                .into_iter()
                .find(|r| r.doc.digest.as_deref() == Some(digest.as_str())),
            RunSelector::Name(name) => {
                let mut matching = runs.into_iter().filter(|r| &r.doc.name == name);
                let first = matching.next();
                if first.is_some() && matching.next().is_some() {
                    warn!(run = %name, "more than one run with this name, using the first");
                }
                first
            }
        };
        picked.ok_or_else(|| CopyError::not_found("run", self.to_string()))
    }
}

impl fmt::Display for RunSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunSelector::Name(name) => f.write_str(name),
            RunSelector::Digest(digest) => write!(f, "digest {digest}"),
            RunSelector::First => f.write_str("first run"),
            RunSelector::Last => f.write_str("last run"),
        }
    }
}

/// Read side of a copy.
#[async_trait]
pub trait PortableSource: Send + Sync {
    /// Fail early if the source cannot be read by this build.
    async fn check_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn model(&self, selector: &ModelSelector) -> Result<ModelDef>;

    /// All runs of the model, in source order.
    async fn runs(&self, model: &ModelDef) -> Result<Vec<RunEntry>>;

    async fn run_param(
        &self,
        model: &ModelDef,
        run: &RunEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>>;

    async fn run_table(&self, model: &ModelDef, run: &RunEntry, table: &TableDef)
        -> Result<TableValues>;

    async fn run_microdata(
        &self,
        model: &ModelDef,
        run: &RunEntry,
        entity: &EntityDef,
    ) -> Result<Vec<MicroCell>>;

    async fn worksets(&self, model: &ModelDef) -> Result<Vec<WorksetEntry>>;

    async fn workset_param(
        &self,
        model: &ModelDef,
        set: &WorksetEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>>;

    async fn tasks(&self, model: &ModelDef) -> Result<Vec<TaskEntry>>;
}

/// Check a store's schema version against this build.
pub(crate) async fn check_store_schema(store: &dyn ModelStore, role: &str) -> Result<()> {
    let found = store.schema_version().await?;
    if found != SCHEMA_VERSION {
        return Err(CopyError::SchemaMismatch(format!(
            "{role} database has schema version {found}, expected {SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

/// Reads portable entities out of a model store.
pub struct DbSource<'a> {
    store: &'a dyn ModelStore,
}

impl<'a> DbSource<'a> {
    pub fn new(store: &'a dyn ModelStore) -> Self {
        Self { store }
    }

    async fn model_id(&self, model: &ModelDef) -> Result<ModelId> {
        self.store
            .find_model_by_digest(&model.digest)
            .await?
            .map(|row| row.model_id)
            .ok_or_else(|| CopyError::not_found("model", format!("digest {}", model.digest)))
    }

    fn run_id(run: &RunEntry) -> Result<RunId> {
        run.source_id
            .ok_or_else(|| CopyError::not_found("source run", run.doc.label()))
    }

    fn set_id(set: &WorksetEntry) -> Result<SetId> {
        set.source_id
            .ok_or_else(|| CopyError::not_found("source workset", set.doc.name.clone()))
    }
}

#[async_trait]
impl PortableSource for DbSource<'_> {
    async fn check_schema(&self) -> Result<()> {
        check_store_schema(self.store, "source").await
    }

    async fn model(&self, selector: &ModelSelector) -> Result<ModelDef> {
        selector.require_any()?;
        let name = selector.name.as_deref().unwrap_or_default();
        Resolver::new(self.store)
            .model(name, selector.digest.as_deref())
            .await?
            .map(|row| row.def)
            .ok_or_else(|| CopyError::not_found("model", selector.to_string()))
    }

    async fn runs(&self, model: &ModelDef) -> Result<Vec<RunEntry>> {
        let model_id = self.model_id(model).await?;
        let rows = self.store.list_runs(model_id).await?;
        Ok(rows
            .iter()
            .map(|row| RunEntry {
                doc: PublicRun::from_row(model, row),
                source_id: Some(row.run_id),
            })
            .collect())
    }

    async fn run_param(
        &self,
        _model: &ModelDef,
        run: &RunEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>> {
        Ok(self.store.read_run_param(Self::run_id(run)?, param.hid).await?)
    }

    async fn run_table(
        &self,
        _model: &ModelDef,
        run: &RunEntry,
        table: &TableDef,
    ) -> Result<TableValues> {
        Ok(self.store.read_run_table(Self::run_id(run)?, table.hid).await?)
    }

    async fn run_microdata(
        &self,
        _model: &ModelDef,
        run: &RunEntry,
        entity: &EntityDef,
    ) -> Result<Vec<MicroCell>> {
        Ok(self
            .store
            .read_run_microdata(Self::run_id(run)?, entity.hid)
            .await?)
    }

    async fn worksets(&self, model: &ModelDef) -> Result<Vec<WorksetEntry>> {
        let model_id = self.model_id(model).await?;
        let run_digests: HashMap<RunId, Option<String>> = self
            .store
            .list_runs(model_id)
            .await?
            .into_iter()
            .map(|r| (r.run_id, r.meta.digest))
            .collect();

        let rows = self.store.list_worksets(model_id).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let base = row.meta.base_run_id;
                let base_digest = base.and_then(|id| run_digests.get(&id).cloned().flatten());
                WorksetEntry {
                    doc: PublicWorkset::from_row(model, row, base_digest),
                    source_id: Some(row.set_id),
                    base_run_source_id: base,
                }
            })
            .collect())
    }

    async fn workset_param(
        &self,
        _model: &ModelDef,
        set: &WorksetEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>> {
        Ok(self
            .store
            .read_workset_param(Self::set_id(set)?, param.hid)
            .await?)
    }

    async fn tasks(&self, model: &ModelDef) -> Result<Vec<TaskEntry>> {
        let model_id = self.model_id(model).await?;
        let run_keys: HashMap<RunId, (String, Option<String>)> = self
            .store
            .list_runs(model_id)
            .await?
            .into_iter()
            .map(|r| (r.run_id, (r.meta.name, r.meta.digest)))
            .collect();
        let set_names: HashMap<SetId, String> = self
            .store
            .list_worksets(model_id)
            .await?
            .into_iter()
            .map(|s| (s.set_id, s.meta.name))
            .collect();

        let mut entries = Vec::new();
        for task in self.store.list_tasks(model_id).await? {
            let mut sets = Vec::new();
            let mut body_ids = Vec::new();
            for set_id in &task.meta.set_ids {
                if let Some(name) = set_names.get(set_id) {
                    sets.push(name.clone());
                    body_ids.push(*set_id);
                }
            }

            let mut history = Vec::new();
            let mut history_ids = Vec::new();
            for row in self.store.list_task_runs(task.task_id).await? {
                let (doc, ids) = project_task_run(
                    &row,
                    |id| run_keys.get(&id).cloned(),
                    |id| set_names.get(&id).cloned(),
                );
                history.push(doc);
                history_ids.push(ids);
            }

            entries.push(TaskEntry {
                doc: PublicTask {
                    model_name: model.name.clone(),
                    model_digest: model.digest.clone(),
                    name: task.meta.name.clone(),
                    txt: task.meta.txt.clone(),
                    sets,
                    history,
                },
                source_id: Some(task.task_id),
                body_ids,
                history_ids,
            });
        }
        Ok(entries)
    }
}
