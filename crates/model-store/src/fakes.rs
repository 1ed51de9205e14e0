//! In-memory fake for the storage trait (testing only)
//!
//! Provides `MemoryModelStore`, which satisfies the `ModelStore` contract
//! without any external dependencies, plus failure injection so copy
//! rollback paths can be exercised.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{Hid, MicroCell, ModelDef, ParamCell, TableValues};
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    models: BTreeMap<ModelId, ModelRow>,
    runs: BTreeMap<RunId, RunRow>,
    run_params: HashMap<(RunId, Hid), Vec<ParamCell>>,
    run_tables: HashMap<(RunId, Hid), TableValues>,
    run_micro: HashMap<(RunId, Hid), Vec<MicroCell>>,
    worksets: BTreeMap<SetId, WorksetRow>,
    set_params: HashMap<(SetId, Hid), Vec<ParamCell>>,
    tasks: BTreeMap<TaskId, TaskRow>,
    task_runs: BTreeMap<TaskRunId, TaskRunRow>,
    failing_param_hids: HashSet<Hid>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn model(&self, model_id: ModelId) -> StorageResult<&ModelRow> {
        self.models
            .get(&model_id)
            .ok_or(StorageError::ModelNotFound {
                model_id: model_id.0,
            })
    }

    fn run(&self, run_id: RunId) -> StorageResult<&RunRow> {
        self.runs
            .get(&run_id)
            .ok_or(StorageError::RunNotFound { run_id: run_id.0 })
    }

    fn workset(&self, set_id: SetId) -> StorageResult<&WorksetRow> {
        self.worksets
            .get(&set_id)
            .ok_or(StorageError::WorksetNotFound { set_id: set_id.0 })
    }

    fn task(&self, task_id: TaskId) -> StorageResult<&TaskRow> {
        self.tasks
            .get(&task_id)
            .ok_or(StorageError::TaskNotFound { task_id: task_id.0 })
    }

    fn check_hid(
        &self,
        model_id: ModelId,
        kind: &'static str,
        hid: Hid,
        exists: impl Fn(&ModelDef) -> bool,
    ) -> StorageResult<()> {
        if exists(&self.model(model_id)?.def) {
            Ok(())
        } else {
            Err(StorageError::UnknownHid {
                model_id: model_id.0,
                kind,
                hid,
            })
        }
    }

    fn check_param_write(&self, hid: Hid) -> StorageResult<()> {
        if self.failing_param_hids.contains(&hid) {
            return Err(StorageError::Injected(format!(
                "parameter write failure for hid {hid}"
            )));
        }
        Ok(())
    }
}

/// In-memory model store backed by ordered maps keyed by store-local id.
///
/// Ids are allocated from one counter shared by all entity kinds, so ids
/// from this store never coincide with a second fake's ids by accident in
/// tests that copy between two fakes.
#[derive(Debug)]
pub struct MemoryModelStore {
    inner: Mutex<Inner>,
    schema_version: u32,
}

impl Default for MemoryModelStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Start allocating ids after `offset`.
    pub fn with_id_offset(offset: i64) -> Self {
        let store = Self::new();
        store.lock().last_id = offset;
        store
    }

    /// A store that reports a different schema version.
    pub fn with_schema_version(version: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            schema_version: version,
        }
    }

    /// Make every later run or workset parameter write for `hid` fail.
    pub fn fail_param_writes_for(&self, hid: Hid) {
        self.lock().failing_param_hids.insert(hid);
    }

    /// Number of runs currently stored, across all models.
    pub fn run_count(&self) -> usize {
        self.lock().runs.len()
    }

    /// Number of worksets currently stored, across all models.
    pub fn workset_count(&self) -> usize {
        self.lock().worksets.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ModelStore for MemoryModelStore {
    async fn schema_version(&self) -> StorageResult<u32> {
        Ok(self.schema_version)
    }

    // -- models --------------------------------------------------------------

    async fn list_models(&self) -> StorageResult<Vec<ModelRow>> {
        Ok(self.lock().models.values().cloned().collect())
    }

    async fn get_model(&self, model_id: ModelId) -> StorageResult<ModelRow> {
        self.lock().model(model_id).cloned()
    }

    async fn find_model_by_digest(&self, digest: &str) -> StorageResult<Option<ModelRow>> {
        Ok(self
            .lock()
            .models
            .values()
            .find(|m| m.def.digest == digest)
            .cloned())
    }

    async fn find_models_by_name(&self, name: &str) -> StorageResult<Vec<ModelRow>> {
        Ok(self
            .lock()
            .models
            .values()
            .filter(|m| m.def.name == name)
            .cloned()
            .collect())
    }

    async fn insert_model(&self, def: &ModelDef) -> StorageResult<ModelId> {
        let mut inner = self.lock();
        if inner.models.values().any(|m| m.def.digest == def.digest) {
            return Err(StorageError::Duplicate {
                kind: "model",
                key: def.digest.clone(),
            });
        }
        let model_id = ModelId(inner.next_id());
        inner.models.insert(
            model_id,
            ModelRow {
                model_id,
                def: def.clone(),
            },
        );
        Ok(model_id)
    }

    // -- runs ----------------------------------------------------------------

    async fn list_runs(&self, model_id: ModelId) -> StorageResult<Vec<RunRow>> {
        let inner = self.lock();
        inner.model(model_id)?;
        Ok(inner
            .runs
            .values()
            .filter(|r| r.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_run(&self, run_id: RunId) -> StorageResult<RunRow> {
        self.lock().run(run_id).cloned()
    }

    async fn find_run_by_digest(
        &self,
        model_id: ModelId,
        digest: &str,
    ) -> StorageResult<Option<RunRow>> {
        Ok(self
            .lock()
            .runs
            .values()
            .find(|r| r.model_id == model_id && r.meta.digest.as_deref() == Some(digest))
            .cloned())
    }

    async fn find_runs_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Vec<RunRow>> {
        Ok(self
            .lock()
            .runs
            .values()
            .filter(|r| r.model_id == model_id && r.meta.name == name)
            .cloned()
            .collect())
    }

    async fn insert_run(&self, model_id: ModelId, meta: &RunMeta) -> StorageResult<RunId> {
        let mut inner = self.lock();
        inner.model(model_id)?;
        let run_id = RunId(inner.next_id());
        inner.runs.insert(
            run_id,
            RunRow {
                run_id,
                model_id,
                meta: meta.clone(),
            },
        );
        Ok(run_id)
    }

    async fn update_run(&self, run_id: RunId, meta: &RunMeta) -> StorageResult<()> {
        let mut inner = self.lock();
        let row = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StorageError::RunNotFound { run_id: run_id.0 })?;
        row.meta = meta.clone();
        Ok(())
    }

    async fn delete_run(&self, run_id: RunId) -> StorageResult<()> {
        let mut inner = self.lock();
        inner
            .runs
            .remove(&run_id)
            .ok_or(StorageError::RunNotFound { run_id: run_id.0 })?;
        inner.run_params.retain(|(id, _), _| *id != run_id);
        inner.run_tables.retain(|(id, _), _| *id != run_id);
        inner.run_micro.retain(|(id, _), _| *id != run_id);
        Ok(())
    }

    async fn read_run_param(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<ParamCell>> {
        let inner = self.lock();
        inner.run(run_id)?;
        Ok(inner
            .run_params
            .get(&(run_id, hid))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_run_param(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        let model_id = inner.run(run_id)?.model_id;
        inner.check_hid(model_id, "parameter", hid, |m| m.param_by_hid(hid).is_some())?;
        inner.check_param_write(hid)?;
        inner.run_params.insert((run_id, hid), cells.to_vec());
        Ok(())
    }

    async fn read_run_table(&self, run_id: RunId, hid: Hid) -> StorageResult<TableValues> {
        let inner = self.lock();
        inner.run(run_id)?;
        Ok(inner
            .run_tables
            .get(&(run_id, hid))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_run_table(
        &self,
        run_id: RunId,
        hid: Hid,
        values: &TableValues,
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        let model_id = inner.run(run_id)?.model_id;
        inner.check_hid(model_id, "output table", hid, |m| {
            m.table_by_hid(hid).is_some()
        })?;
        inner.run_tables.insert((run_id, hid), values.clone());
        Ok(())
    }

    async fn read_run_microdata(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<MicroCell>> {
        let inner = self.lock();
        inner.run(run_id)?;
        Ok(inner
            .run_micro
            .get(&(run_id, hid))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_run_microdata(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[MicroCell],
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        let model_id = inner.run(run_id)?.model_id;
        inner.check_hid(model_id, "entity", hid, |m| m.entity_by_hid(hid).is_some())?;
        inner.run_micro.insert((run_id, hid), cells.to_vec());
        Ok(())
    }

    // -- worksets ------------------------------------------------------------

    async fn list_worksets(&self, model_id: ModelId) -> StorageResult<Vec<WorksetRow>> {
        let inner = self.lock();
        inner.model(model_id)?;
        Ok(inner
            .worksets
            .values()
            .filter(|w| w.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_workset(&self, set_id: SetId) -> StorageResult<WorksetRow> {
        self.lock().workset(set_id).cloned()
    }

    async fn find_workset_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<WorksetRow>> {
        Ok(self
            .lock()
            .worksets
            .values()
            .find(|w| w.model_id == model_id && w.meta.name == name)
            .cloned())
    }

    async fn insert_workset(&self, model_id: ModelId, meta: &WorksetMeta) -> StorageResult<SetId> {
        let mut inner = self.lock();
        inner.model(model_id)?;
        if inner
            .worksets
            .values()
            .any(|w| w.model_id == model_id && w.meta.name == meta.name)
        {
            return Err(StorageError::Duplicate {
                kind: "workset",
                key: meta.name.clone(),
            });
        }
        let set_id = SetId(inner.next_id());
        inner.worksets.insert(
            set_id,
            WorksetRow {
                set_id,
                model_id,
                meta: meta.clone(),
            },
        );
        Ok(set_id)
    }

    async fn update_workset(&self, set_id: SetId, meta: &WorksetMeta) -> StorageResult<()> {
        let mut inner = self.lock();
        let row = inner
            .worksets
            .get_mut(&set_id)
            .ok_or(StorageError::WorksetNotFound { set_id: set_id.0 })?;
        row.meta = meta.clone();
        Ok(())
    }

    async fn delete_workset(&self, set_id: SetId) -> StorageResult<()> {
        let mut inner = self.lock();
        inner
            .worksets
            .remove(&set_id)
            .ok_or(StorageError::WorksetNotFound { set_id: set_id.0 })?;
        inner.set_params.retain(|(id, _), _| *id != set_id);
        Ok(())
    }

    async fn clear_workset_values(&self, set_id: SetId) -> StorageResult<()> {
        let mut inner = self.lock();
        if inner.workset(set_id)?.meta.is_readonly {
            return Err(StorageError::ReadonlyWorkset { set_id: set_id.0 });
        }
        inner.set_params.retain(|(id, _), _| *id != set_id);
        Ok(())
    }

    async fn read_workset_param(&self, set_id: SetId, hid: Hid) -> StorageResult<Vec<ParamCell>> {
        let inner = self.lock();
        inner.workset(set_id)?;
        Ok(inner
            .set_params
            .get(&(set_id, hid))
            .cloned()
            .unwrap_or_default())
    }

    async fn write_workset_param(
        &self,
        set_id: SetId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()> {
        let mut inner = self.lock();
        let row = inner.workset(set_id)?;
        if row.meta.is_readonly {
            return Err(StorageError::ReadonlyWorkset { set_id: set_id.0 });
        }
        let model_id = row.model_id;
        inner.check_hid(model_id, "parameter", hid, |m| m.param_by_hid(hid).is_some())?;
        inner.check_param_write(hid)?;
        inner.set_params.insert((set_id, hid), cells.to_vec());
        Ok(())
    }

    // -- tasks ---------------------------------------------------------------

    async fn list_tasks(&self, model_id: ModelId) -> StorageResult<Vec<TaskRow>> {
        let inner = self.lock();
        inner.model(model_id)?;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: TaskId) -> StorageResult<TaskRow> {
        self.lock().task(task_id).cloned()
    }

    async fn find_task_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<TaskRow>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .find(|t| t.model_id == model_id && t.meta.name == name)
            .cloned())
    }

    async fn insert_task(&self, model_id: ModelId, meta: &TaskMeta) -> StorageResult<TaskId> {
        let mut inner = self.lock();
        inner.model(model_id)?;
        if inner
            .tasks
            .values()
            .any(|t| t.model_id == model_id && t.meta.name == meta.name)
        {
            return Err(StorageError::Duplicate {
                kind: "task",
                key: meta.name.clone(),
            });
        }
        let task_id = TaskId(inner.next_id());
        inner.tasks.insert(
            task_id,
            TaskRow {
                task_id,
                model_id,
                meta: meta.clone(),
            },
        );
        Ok(task_id)
    }

    async fn update_task(&self, task_id: TaskId, meta: &TaskMeta) -> StorageResult<()> {
        let mut inner = self.lock();
        let row = inner
            .tasks
            .get_mut(&task_id)
            .ok_or(StorageError::TaskNotFound { task_id: task_id.0 })?;
        row.meta = meta.clone();
        Ok(())
    }

    async fn list_task_runs(&self, task_id: TaskId) -> StorageResult<Vec<TaskRunRow>> {
        let inner = self.lock();
        inner.task(task_id)?;
        Ok(inner
            .task_runs
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn insert_task_run(
        &self,
        task_id: TaskId,
        meta: &TaskRunMeta,
    ) -> StorageResult<TaskRunId> {
        let mut inner = self.lock();
        inner.task(task_id)?;
        let task_run_id = TaskRunId(inner.next_id());
        inner.task_runs.insert(
            task_run_id,
            TaskRunRow {
                task_run_id,
                task_id,
                meta: meta.clone(),
            },
        );
        Ok(task_run_id)
    }
}
