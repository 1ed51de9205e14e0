//! Where portable entities are written to.
//!
//! An [`EntitySink`] materializes entities in two phases: `begin_*` creates
//! or reclaims the destination row, the copier writes value tables into the
//! returned slot, then `finish_*` commits the final metadata. On any failure
//! in between the copier calls `abort_*`, which undoes what `begin_*` did.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use model_store::{
    EntityDef, MicroCell, ModelDef, ModelId, ModelStore, ParamCell, ParamDef, RunId, RunStatus,
    SetId, TableDef, TableValues, TaskMeta, TaskRunItem, TaskRunMeta,
};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::copy::CopyWarning;
use crate::error::{CopyError, Result};
use crate::id_map::SessionIds;
use crate::portable::{PublicRun, PublicWorkset, TaskEntry, ValueFile, WorksetEntry};
use crate::resolver::Resolver;
use crate::source::check_store_schema;

/// What a copy did with the destination entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Created,
    Replaced,
    AlreadyExists,
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Placement::Created => "created",
            Placement::Replaced => "replaced",
            Placement::AlreadyExists => "already exists",
        })
    }
}

/// A run being materialized.
#[derive(Debug, Clone, Default)]
pub struct RunSlot {
    /// Destination row, for database sinks
    pub id: Option<RunId>,
    /// Value directory relative to the repository root, for text sinks
    pub dir: Option<String>,
    pub files: Vec<ValueFile>,
}

/// A workset being materialized. It stays writable until `finish_workset`.
#[derive(Debug, Clone, Default)]
pub struct WorksetSlot {
    pub id: Option<SetId>,
    pub dir: Option<String>,
    /// The row was inserted by `begin_workset`, not reused
    pub created: bool,
    pub base_run_id: Option<RunId>,
    /// The source named a base run that the destination does not have
    pub base_run_missing: bool,
    pub files: Vec<ValueFile>,
}

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub placement: Placement,
    pub id: Option<i64>,
    pub warnings: Vec<CopyWarning>,
}

/// Write side of a copy.
#[async_trait]
pub trait EntitySink: Send + Sync {
    async fn check_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn write_model(&self, model: &ModelDef) -> Result<Placement>;

    /// Destination id of an equivalent run, if one exists.
    async fn find_run(&self, model: &ModelDef, run: &PublicRun) -> Result<Option<RunId>>;

    async fn begin_run(&self, model: &ModelDef, run: &PublicRun) -> Result<RunSlot>;

    async fn put_run_param(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()>;

    async fn put_run_table(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        table: &TableDef,
        values: &TableValues,
    ) -> Result<()>;

    async fn put_run_microdata(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        entity: &EntityDef,
        cells: &[MicroCell],
    ) -> Result<()>;

    /// Commit run metadata; returns the destination id for database sinks.
    async fn finish_run(
        &self,
        model: &ModelDef,
        slot: &RunSlot,
        run: &PublicRun,
    ) -> Result<Option<RunId>>;

    async fn abort_run(&self, model: &ModelDef, slot: &RunSlot) -> Result<()>;

    async fn begin_workset(
        &self,
        model: &ModelDef,
        set: &WorksetEntry,
        ids: &SessionIds,
    ) -> Result<WorksetSlot>;

    async fn put_workset_param(
        &self,
        model: &ModelDef,
        slot: &mut WorksetSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()>;

    /// Commit workset metadata, including its read-only flag.
    async fn finish_workset(
        &self,
        model: &ModelDef,
        slot: &WorksetSlot,
        set: &PublicWorkset,
    ) -> Result<Option<SetId>>;

    async fn abort_workset(&self, model: &ModelDef, slot: &WorksetSlot) -> Result<()>;

    /// Write a task with its body and run history.
    async fn put_task(
        &self,
        model: &ModelDef,
        task: &TaskEntry,
        ids: &SessionIds,
    ) -> Result<TaskOutcome>;
}

/// Writes portable entities into a model store.
pub struct DbSink<'a> {
    store: &'a dyn ModelStore,
}

impl<'a> DbSink<'a> {
    pub fn new(store: &'a dyn ModelStore) -> Self {
        Self { store }
    }

    async fn model_id(&self, model: &ModelDef) -> Result<ModelId> {
        Resolver::new(self.store)
            .model(&model.name, Some(&model.digest))
            .await?
            .map(|row| row.model_id)
            .ok_or_else(|| {
                CopyError::not_found(
                    "destination model",
                    format!("{} (digest {})", model.name, model.digest),
                )
            })
    }

    fn run_id(slot: &RunSlot) -> Result<RunId> {
        slot.id
            .ok_or_else(|| CopyError::Config("run slot has no destination id".to_string()))
    }

    fn set_id(slot: &WorksetSlot) -> Result<SetId> {
        slot.id
            .ok_or_else(|| CopyError::Config("workset slot has no destination id".to_string()))
    }
}

#[async_trait]
impl EntitySink for DbSink<'_> {
    async fn check_schema(&self) -> Result<()> {
        check_store_schema(self.store, "destination").await
    }

    #[instrument(skip_all, fields(model = %model.name))]
    async fn write_model(&self, model: &ModelDef) -> Result<Placement> {
        if self.store.find_model_by_digest(&model.digest).await?.is_some() {
            return Ok(Placement::AlreadyExists);
        }
        let id = self.store.insert_model(model).await?;
        debug!(model_id = %id, "model inserted");
        Ok(Placement::Created)
    }

    async fn find_run(&self, model: &ModelDef, run: &PublicRun) -> Result<Option<RunId>> {
        let model_id = self.model_id(model).await?;
        Ok(Resolver::new(self.store)
            .run(model_id, &run.name, run.digest.as_deref())
            .await?
            .map(|row| row.run_id))
    }

    async fn begin_run(&self, model: &ModelDef, run: &PublicRun) -> Result<RunSlot> {
        let model_id = self.model_id(model).await?;
        let meta = run.to_meta(RunStatus::Running, None, None);
        let id = self.store.insert_run(model_id, &meta).await?;
        Ok(RunSlot {
            id: Some(id),
            ..RunSlot::default()
        })
    }

    async fn put_run_param(
        &self,
        _model: &ModelDef,
        slot: &mut RunSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()> {
        Ok(self
            .store
            .write_run_param(Self::run_id(slot)?, param.hid, cells)
            .await?)
    }

    async fn put_run_table(
        &self,
        _model: &ModelDef,
        slot: &mut RunSlot,
        table: &TableDef,
        values: &TableValues,
    ) -> Result<()> {
        Ok(self
            .store
            .write_run_table(Self::run_id(slot)?, table.hid, values)
            .await?)
    }

    async fn put_run_microdata(
        &self,
        _model: &ModelDef,
        slot: &mut RunSlot,
        entity: &EntityDef,
        cells: &[MicroCell],
    ) -> Result<()> {
        Ok(self
            .store
            .write_run_microdata(Self::run_id(slot)?, entity.hid, cells)
            .await?)
    }

    async fn finish_run(
        &self,
        _model: &ModelDef,
        slot: &RunSlot,
        run: &PublicRun,
    ) -> Result<Option<RunId>> {
        let id = Self::run_id(slot)?;
        let (digest, value_digest) = match (&run.digest, &run.value_digest) {
            (Some(d), Some(v)) => (d.clone(), v.clone()),
            (d, v) => {
                let computed = self.store.compute_run_digest(id).await?;
                (
                    d.clone().unwrap_or(computed.digest),
                    v.clone().unwrap_or(computed.value_digest),
                )
            }
        };
        let meta = run.to_meta(run.status, Some(digest), Some(value_digest));
        self.store.update_run(id, &meta).await?;
        Ok(Some(id))
    }

    async fn abort_run(&self, _model: &ModelDef, slot: &RunSlot) -> Result<()> {
        if let Some(id) = slot.id {
            self.store.delete_run(id).await?;
        }
        Ok(())
    }

    async fn begin_workset(
        &self,
        model: &ModelDef,
        set: &WorksetEntry,
        ids: &SessionIds,
    ) -> Result<WorksetSlot> {
        let model_id = self.model_id(model).await?;
        let resolver = Resolver::new(self.store);
        let doc = &set.doc;

        let mut base_run_id = ids.run(set.base_run_source_id);
        if base_run_id.is_none() {
            if let Some(digest) = &doc.base_run_digest {
                base_run_id = resolver
                    .run(model_id, "", Some(digest))
                    .await?
                    .map(|row| row.run_id);
            }
        }
        let wants_base = doc.base_run_digest.is_some() || set.base_run_source_id.is_some();

        let meta = doc.to_meta(model, base_run_id, false)?;
        let (id, created) = match resolver.workset(model_id, &doc.name).await? {
            Some(existing) => {
                self.store.update_workset(existing.set_id, &meta).await?;
                self.store.clear_workset_values(existing.set_id).await?;
                (existing.set_id, false)
            }
            None => (self.store.insert_workset(model_id, &meta).await?, true),
        };
        Ok(WorksetSlot {
            id: Some(id),
            created,
            base_run_id,
            base_run_missing: wants_base && base_run_id.is_none(),
            ..WorksetSlot::default()
        })
    }

    async fn put_workset_param(
        &self,
        _model: &ModelDef,
        slot: &mut WorksetSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()> {
        Ok(self
            .store
            .write_workset_param(Self::set_id(slot)?, param.hid, cells)
            .await?)
    }

    async fn finish_workset(
        &self,
        model: &ModelDef,
        slot: &WorksetSlot,
        set: &PublicWorkset,
    ) -> Result<Option<SetId>> {
        let id = Self::set_id(slot)?;
        let meta = set.to_meta(model, slot.base_run_id, set.is_readonly)?;
        self.store.update_workset(id, &meta).await?;
        Ok(Some(id))
    }

    async fn abort_workset(&self, _model: &ModelDef, slot: &WorksetSlot) -> Result<()> {
        // a reused workset was left writable by begin_workset
        if let (Some(id), true) = (slot.id, slot.created) {
            self.store.delete_workset(id).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(task = %task.doc.name))]
    async fn put_task(
        &self,
        model: &ModelDef,
        task: &TaskEntry,
        ids: &SessionIds,
    ) -> Result<TaskOutcome> {
        let model_id = self.model_id(model).await?;
        let resolver = Resolver::new(self.store);
        let doc = &task.doc;
        let mut warnings = Vec::new();

        let mut set_ids = Vec::new();
        for (i, name) in doc.sets.iter().enumerate() {
            let mut id = ids.set(task.body_source_id(i));
            if id.is_none() {
                id = resolver.workset(model_id, name).await?.map(|w| w.set_id);
            }
            match id {
                Some(id) => set_ids.push(id),
                None => warnings.push(CopyWarning::TaskSetNotFound {
                    task: doc.name.clone(),
                    set: name.clone(),
                }),
            }
        }

        let meta = TaskMeta {
            name: doc.name.clone(),
            txt: doc.txt.clone(),
            set_ids,
        };
        let (task_id, placement) = match resolver.task(model_id, &doc.name).await? {
            Some(existing) => {
                self.store.update_task(existing.task_id, &meta).await?;
                (existing.task_id, Placement::Replaced)
            }
            None => (
                self.store.insert_task(model_id, &meta).await?,
                Placement::Created,
            ),
        };

        let mut seen: HashSet<(String, String)> = self
            .store
            .list_task_runs(task_id)
            .await?
            .into_iter()
            .map(|r| (r.meta.name, r.meta.run_stamp))
            .collect();

        for (h, task_run) in doc.history.iter().enumerate() {
            if !seen.insert(task_run.history_key()) {
                debug!(task_run = %task_run.name, "task run already recorded");
                continue;
            }
            let mut items = Vec::new();
            for (k, item) in task_run.items.iter().enumerate() {
                let source = task.item_source_ids(h, k);
                let mut run_id = ids.run(source.map(|s| s.run_id));
                if run_id.is_none() {
                    run_id = resolver
                        .run(model_id, &item.run_name, item.run_digest.as_deref())
                        .await?
                        .map(|r| r.run_id);
                }
                let mut set_id = ids.set(source.map(|s| s.set_id));
                if set_id.is_none() {
                    set_id = resolver
                        .workset(model_id, &item.set_name)
                        .await?
                        .map(|w| w.set_id);
                }
                match (run_id, set_id) {
                    (Some(run_id), Some(set_id)) => items.push(TaskRunItem { run_id, set_id }),
                    _ => warnings.push(CopyWarning::TaskRunNotLinked {
                        task: doc.name.clone(),
                        task_run: task_run.name.clone(),
                        run: item.run_name.clone(),
                    }),
                }
            }
            let meta = TaskRunMeta {
                name: task_run.name.clone(),
                sub_count: task_run.sub_count,
                status: task_run.status,
                create_date: task_run.create_date,
                update_date: task_run.update_date,
                run_stamp: task_run.run_stamp.clone(),
                items,
            };
            self.store.insert_task_run(task_id, &meta).await?;
        }

        Ok(TaskOutcome {
            placement,
            id: Some(task_id.0),
            warnings,
        })
    }
}
