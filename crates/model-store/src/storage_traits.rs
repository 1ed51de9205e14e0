//! Storage trait definitions for dbcopy
//!
//! `ModelStore` is the single storage collaborator the copy engine talks to:
//! read, insert, update and delete primitives for models, runs, worksets and
//! tasks plus their value rows, and digest computation.
//!
//! All numeric ids are local to one store. They are never meaningful in
//! another store and never leave the process in the portable form.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::DigestBuilder;
use crate::error::StorageError;
use crate::schema::{DescrNote, Hid, MicroCell, ModelDef, ParamCell, TableValues};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Schema version understood by this build.
pub const SCHEMA_VERSION: u32 = 1;

macro_rules! store_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

store_id!(
    /// Store-local model id
    ModelId
);
store_id!(
    /// Store-local run id
    RunId
);
store_id!(
    /// Store-local workset id
    SetId
);
store_id!(
    /// Store-local task id
    TaskId
);
store_id!(
    /// Store-local task run id
    TaskRunId
);

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub model_id: ModelId,
    pub def: ModelDef,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Status of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Error,
    Exited,
}

impl RunStatus {
    /// Completed runs are final and the only ones eligible for copy.
    pub fn is_completed(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Exited => "exited",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            "exited" => Some(RunStatus::Exited),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run metadata without store ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub name: String,
    pub sub_count: i32,
    pub status: RunStatus,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    /// Digest of the parameter values, `None` until computed.
    pub digest: Option<String>,
    /// Digest of the output values, `None` until computed.
    pub value_digest: Option<String>,
    #[serde(default)]
    pub run_stamp: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRow {
    pub run_id: RunId,
    pub model_id: ModelId,
    #[serde(flatten)]
    pub meta: RunMeta,
}

/// Content digests of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDigests {
    pub digest: String,
    pub value_digest: String,
}

// ---------------------------------------------------------------------------
// Worksets
// ---------------------------------------------------------------------------

/// A parameter declared in a workset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksetParam {
    pub hid: Hid,
    pub sub_count: i32,
    pub default_sub_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksetMeta {
    pub name: String,
    pub is_readonly: bool,
    pub base_run_id: Option<RunId>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub params: Vec<WorksetParam>,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksetRow {
    pub set_id: SetId,
    pub model_id: ModelId,
    #[serde(flatten)]
    pub meta: WorksetMeta,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub name: String,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    /// Task body: worksets in execution order.
    #[serde(default)]
    pub set_ids: Vec<SetId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub task_id: TaskId,
    pub model_id: ModelId,
    #[serde(flatten)]
    pub meta: TaskMeta,
}

/// One (workset, run) pair of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunItem {
    pub run_id: RunId,
    pub set_id: SetId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunMeta {
    pub name: String,
    pub sub_count: i32,
    pub status: RunStatus,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub run_stamp: String,
    #[serde(default)]
    pub items: Vec<TaskRunItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRunRow {
    pub task_run_id: TaskRunId,
    pub task_id: TaskId,
    #[serde(flatten)]
    pub meta: TaskRunMeta,
}

// ---------------------------------------------------------------------------
// ModelStore
// ---------------------------------------------------------------------------

/// Storage of models and everything a model owns.
///
/// Guarantees:
/// - Insert operations allocate a fresh store-local id and never reuse one.
/// - `write_*` value operations replace the stored value set for that
///   (owner, hid) pair; they never merge.
/// - `delete_run` and `delete_workset` remove the owned value rows too.
/// - Value writes to a read-only workset fail with `ReadonlyWorkset`.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Schema version recorded in the store.
    async fn schema_version(&self) -> StorageResult<u32>;

    // -- models --------------------------------------------------------------

    async fn list_models(&self) -> StorageResult<Vec<ModelRow>>;

    async fn get_model(&self, model_id: ModelId) -> StorageResult<ModelRow>;

    async fn find_model_by_digest(&self, digest: &str) -> StorageResult<Option<ModelRow>>;

    /// All models with this name, ordered by id.
    async fn find_models_by_name(&self, name: &str) -> StorageResult<Vec<ModelRow>>;

    /// Insert a model definition. Fails with `Duplicate` if the digest exists.
    async fn insert_model(&self, def: &ModelDef) -> StorageResult<ModelId>;

    // -- runs ----------------------------------------------------------------

    /// All runs of a model, ordered by id.
    async fn list_runs(&self, model_id: ModelId) -> StorageResult<Vec<RunRow>>;

    async fn get_run(&self, run_id: RunId) -> StorageResult<RunRow>;

    async fn find_run_by_digest(
        &self,
        model_id: ModelId,
        digest: &str,
    ) -> StorageResult<Option<RunRow>>;

    /// All runs of a model with this name, ordered by id.
    async fn find_runs_by_name(&self, model_id: ModelId, name: &str)
        -> StorageResult<Vec<RunRow>>;

    async fn insert_run(&self, model_id: ModelId, meta: &RunMeta) -> StorageResult<RunId>;

    /// Replace run metadata (status, digests, dates, descriptions).
    async fn update_run(&self, run_id: RunId, meta: &RunMeta) -> StorageResult<()>;

    /// Delete a run and all of its value rows.
    async fn delete_run(&self, run_id: RunId) -> StorageResult<()>;

    /// Parameter values of a run; empty if none were written.
    async fn read_run_param(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<ParamCell>>;

    async fn write_run_param(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()>;

    async fn read_run_table(&self, run_id: RunId, hid: Hid) -> StorageResult<TableValues>;

    async fn write_run_table(
        &self,
        run_id: RunId,
        hid: Hid,
        values: &TableValues,
    ) -> StorageResult<()>;

    async fn read_run_microdata(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<MicroCell>>;

    async fn write_run_microdata(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[MicroCell],
    ) -> StorageResult<()>;

    /// Compute run digests from the stored values.
    ///
    /// The digest covers the model digest and every parameter value set in
    /// hid order; the value digest covers output tables and microdata.
    async fn compute_run_digest(&self, run_id: RunId) -> StorageResult<RunDigests> {
        let run = self.get_run(run_id).await?;
        let model = self.get_model(run.model_id).await?;

        let mut params = model.def.params.clone();
        params.sort_by_key(|p| p.hid);
        let mut digest = DigestBuilder::new("run");
        digest.section(&model.def.digest);
        for param in &params {
            let cells = self.read_run_param(run_id, param.hid).await?;
            digest.section(&param.name);
            digest.cells(&cells)?;
        }

        let mut tables = model.def.tables.clone();
        tables.sort_by_key(|t| t.hid);
        let mut values = DigestBuilder::new("values");
        for table in &tables {
            let table_values = self.read_run_table(run_id, table.hid).await?;
            values.section(&table.name);
            values.cells(&table_values.exprs)?;
            values.cells(&table_values.accs)?;
        }
        let mut entities = model.def.entities.clone();
        entities.sort_by_key(|e| e.hid);
        for entity in &entities {
            let micro = self.read_run_microdata(run_id, entity.hid).await?;
            if !micro.is_empty() {
                values.section(&entity.name);
                values.cells(&micro)?;
            }
        }

        Ok(RunDigests {
            digest: digest.finish(),
            value_digest: values.finish(),
        })
    }

    // -- worksets ------------------------------------------------------------

    async fn list_worksets(&self, model_id: ModelId) -> StorageResult<Vec<WorksetRow>>;

    async fn get_workset(&self, set_id: SetId) -> StorageResult<WorksetRow>;

    async fn find_workset_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<WorksetRow>>;

    /// Insert a workset. Fails with `Duplicate` if the name exists in the model.
    async fn insert_workset(&self, model_id: ModelId, meta: &WorksetMeta) -> StorageResult<SetId>;

    async fn update_workset(&self, set_id: SetId, meta: &WorksetMeta) -> StorageResult<()>;

    async fn delete_workset(&self, set_id: SetId) -> StorageResult<()>;

    /// Remove every parameter value row of a writable workset.
    async fn clear_workset_values(&self, set_id: SetId) -> StorageResult<()>;

    async fn read_workset_param(&self, set_id: SetId, hid: Hid) -> StorageResult<Vec<ParamCell>>;

    async fn write_workset_param(
        &self,
        set_id: SetId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()>;

    // -- tasks ---------------------------------------------------------------

    async fn list_tasks(&self, model_id: ModelId) -> StorageResult<Vec<TaskRow>>;

    async fn get_task(&self, task_id: TaskId) -> StorageResult<TaskRow>;

    async fn find_task_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<TaskRow>>;

    async fn insert_task(&self, model_id: ModelId, meta: &TaskMeta) -> StorageResult<TaskId>;

    async fn update_task(&self, task_id: TaskId, meta: &TaskMeta) -> StorageResult<()>;

    /// Task run history, ordered by id.
    async fn list_task_runs(&self, task_id: TaskId) -> StorageResult<Vec<TaskRunRow>>;

    async fn insert_task_run(
        &self,
        task_id: TaskId,
        meta: &TaskRunMeta,
    ) -> StorageResult<TaskRunId>;
}
