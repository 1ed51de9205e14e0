//! SurrealDB-backed ModelStore implementation
//!
//! Uses private `Db*` row structs for persistence, converting to/from
//! `storage_traits` types at the boundary. Numeric ids are allocated from
//! the `id_lst` counter table; value sets are stored one row per
//! (owner, hid) with the cells serialized as JSON text.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::handle::{self, StoreConfig};
use crate::migrations;
use crate::schema::{DescrNote, Hid, MicroCell, ModelDef, ParamCell, TableValues};
use crate::storage_traits::*;

/// Serialize chrono DateTime as a SurrealDB datetime
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbModel {
    model_id: i64,
    name: String,
    digest: String,
    def_json: String,
}

impl DbModel {
    fn into_row(self) -> StorageResult<ModelRow> {
        Ok(ModelRow {
            model_id: ModelId(self.model_id),
            def: serde_json::from_str(&self.def_json)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRun {
    run_id: i64,
    model_id: i64,
    name: String,
    sub_count: i32,
    status: String,
    #[serde(with = "surreal_datetime")]
    create_date: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    update_date: DateTime<Utc>,
    digest: Option<String>,
    value_digest: Option<String>,
    #[serde(default)]
    run_stamp: String,
    #[serde(default)]
    options: BTreeMap<String, String>,
    #[serde(default)]
    txt: Vec<DescrNote>,
}

impl DbRun {
    fn new(run_id: RunId, model_id: ModelId, meta: &RunMeta) -> Self {
        Self {
            run_id: run_id.0,
            model_id: model_id.0,
            name: meta.name.clone(),
            sub_count: meta.sub_count,
            status: meta.status.as_str().to_string(),
            create_date: meta.create_date,
            update_date: meta.update_date,
            digest: meta.digest.clone(),
            value_digest: meta.value_digest.clone(),
            run_stamp: meta.run_stamp.clone(),
            options: meta.options.clone(),
            txt: meta.txt.clone(),
        }
    }

    fn into_row(self) -> StorageResult<RunRow> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| StorageError::Backend(format!("unknown run status: {}", self.status)))?;
        Ok(RunRow {
            run_id: RunId(self.run_id),
            model_id: ModelId(self.model_id),
            meta: RunMeta {
                name: self.name,
                sub_count: self.sub_count,
                status,
                create_date: self.create_date,
                update_date: self.update_date,
                digest: self.digest,
                value_digest: self.value_digest,
                run_stamp: self.run_stamp,
                options: self.options,
                txt: self.txt,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbWorkset {
    set_id: i64,
    model_id: i64,
    name: String,
    is_readonly: bool,
    base_run_id: Option<i64>,
    #[serde(with = "surreal_datetime")]
    update_date: DateTime<Utc>,
    #[serde(default)]
    params: Vec<WorksetParam>,
    #[serde(default)]
    txt: Vec<DescrNote>,
}

impl DbWorkset {
    fn new(set_id: SetId, model_id: ModelId, meta: &WorksetMeta) -> Self {
        Self {
            set_id: set_id.0,
            model_id: model_id.0,
            name: meta.name.clone(),
            is_readonly: meta.is_readonly,
            base_run_id: meta.base_run_id.map(|r| r.0),
            update_date: meta.update_date,
            params: meta.params.clone(),
            txt: meta.txt.clone(),
        }
    }

    fn into_row(self) -> WorksetRow {
        WorksetRow {
            set_id: SetId(self.set_id),
            model_id: ModelId(self.model_id),
            meta: WorksetMeta {
                name: self.name,
                is_readonly: self.is_readonly,
                base_run_id: self.base_run_id.map(RunId),
                update_date: self.update_date,
                params: self.params,
                txt: self.txt,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbTask {
    task_id: i64,
    model_id: i64,
    name: String,
    #[serde(default)]
    txt: Vec<DescrNote>,
    #[serde(default)]
    set_ids: Vec<i64>,
}

impl DbTask {
    fn new(task_id: TaskId, model_id: ModelId, meta: &TaskMeta) -> Self {
        Self {
            task_id: task_id.0,
            model_id: model_id.0,
            name: meta.name.clone(),
            txt: meta.txt.clone(),
            set_ids: meta.set_ids.iter().map(|s| s.0).collect(),
        }
    }

    fn into_row(self) -> TaskRow {
        TaskRow {
            task_id: TaskId(self.task_id),
            model_id: ModelId(self.model_id),
            meta: TaskMeta {
                name: self.name,
                txt: self.txt,
                set_ids: self.set_ids.into_iter().map(SetId).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbTaskRun {
    task_run_id: i64,
    task_id: i64,
    name: String,
    sub_count: i32,
    status: String,
    #[serde(with = "surreal_datetime")]
    create_date: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    update_date: DateTime<Utc>,
    #[serde(default)]
    run_stamp: String,
    #[serde(default)]
    items: Vec<TaskRunItem>,
}

impl DbTaskRun {
    fn into_row(self) -> StorageResult<TaskRunRow> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| {
            StorageError::Backend(format!("unknown task run status: {}", self.status))
        })?;
        Ok(TaskRunRow {
            task_run_id: TaskRunId(self.task_run_id),
            task_id: TaskId(self.task_id),
            meta: TaskRunMeta {
                name: self.name,
                sub_count: self.sub_count,
                status,
                create_date: self.create_date,
                update_date: self.update_date,
                run_stamp: self.run_stamp,
                items: self.items,
            },
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbValues {
    owner: String,
    owner_id: i64,
    kind: String,
    hid: Hid,
    cells: String,
}

#[derive(Debug, Deserialize)]
struct CellsOnly {
    cells: String,
}

#[derive(Debug, Deserialize)]
struct LastId {
    last: i64,
}

/// Address of one stored value set.
#[derive(Debug, Clone, Copy)]
struct ValueKey {
    owner: &'static str,
    owner_id: i64,
    kind: &'static str,
    hid: Hid,
}

/// SurrealDB-backed implementation of [`ModelStore`].
#[derive(Clone)]
pub struct SurrealModelStore {
    db: Surreal<Any>,
}

impl SurrealModelStore {
    /// Open an in-memory store, for tests and scratch copies.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::open(&StoreConfig::memory()).await
    }

    /// Open the configured store, running migrations and the version check.
    pub async fn open(config: &StoreConfig) -> crate::Result<Self> {
        let db = handle::open(config).await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    /// Allocate the next id for an entity kind.
    async fn next_id(&self, kind: &'static str) -> StorageResult<i64> {
        let sql = format!("UPSERT id_lst:{kind} SET last = (last OR 0) + 1 RETURN AFTER");
        let mut res = self.db.query(sql).await?;
        let rows: Vec<LastId> = res.take(0)?;
        rows.first()
            .map(|r| r.last)
            .ok_or_else(|| StorageError::Backend(format!("failed to allocate {kind} id")))
    }

    async fn fetch_runs(&self, sql: &'static str, model_id: i64, key: String) -> StorageResult<Vec<RunRow>> {
        let mut res = self
            .db
            .query(sql)
            .bind(("model_id", model_id))
            .bind(("key", key))
            .await?;
        let rows: Vec<DbRun> = res.take(0)?;
        rows.into_iter().map(DbRun::into_row).collect()
    }

    async fn read_values<T: DeserializeOwned + Send>(&self, key: ValueKey) -> StorageResult<Option<T>> {
        let mut res = self
            .db
            .query(
                "SELECT cells FROM value_tables \
                 WHERE owner = $owner AND owner_id = $owner_id AND kind = $kind AND hid = $hid",
            )
            .bind(("owner", key.owner))
            .bind(("owner_id", key.owner_id))
            .bind(("kind", key.kind))
            .bind(("hid", key.hid))
            .await?;
        let rows: Vec<CellsOnly> = res.take(0)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_str(&row.cells)?)),
            None => Ok(None),
        }
    }

    async fn write_values<T: Serialize + Sync + ?Sized>(
        &self,
        key: ValueKey,
        cells: &T,
    ) -> StorageResult<()> {
        let record = DbValues {
            owner: key.owner.to_string(),
            owner_id: key.owner_id,
            kind: key.kind.to_string(),
            hid: key.hid,
            cells: serde_json::to_string(cells)?,
        };
        self.db
            .query(
                "DELETE FROM value_tables \
                 WHERE owner = $owner AND owner_id = $owner_id AND kind = $kind AND hid = $hid; \
                 CREATE value_tables CONTENT $record;",
            )
            .bind(("owner", key.owner))
            .bind(("owner_id", key.owner_id))
            .bind(("kind", key.kind))
            .bind(("hid", key.hid))
            .bind(("record", record))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_values(&self, owner: &'static str, owner_id: i64) -> StorageResult<()> {
        self.db
            .query("DELETE FROM value_tables WHERE owner = $owner AND owner_id = $owner_id")
            .bind(("owner", owner))
            .bind(("owner_id", owner_id))
            .await?
            .check()?;
        Ok(())
    }

    async fn require_hid(
        &self,
        model_id: ModelId,
        kind: &'static str,
        hid: Hid,
        exists: impl Fn(&ModelDef) -> bool + Send,
    ) -> StorageResult<()> {
        let model = self.get_model(model_id).await?;
        if exists(&model.def) {
            Ok(())
        } else {
            Err(StorageError::UnknownHid {
                model_id: model_id.0,
                kind,
                hid,
            })
        }
    }
}

#[async_trait]
impl ModelStore for SurrealModelStore {
    async fn schema_version(&self) -> StorageResult<u32> {
        let version = migrations::read_schema_version(&self.db).await?;
        version.ok_or_else(|| StorageError::Backend("store has no schema version".to_string()))
    }

    // -- models --------------------------------------------------------------

    async fn list_models(&self) -> StorageResult<Vec<ModelRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM models ORDER BY model_id")
            .await?;
        let rows: Vec<DbModel> = res.take(0)?;
        rows.into_iter().map(DbModel::into_row).collect()
    }

    async fn get_model(&self, model_id: ModelId) -> StorageResult<ModelRow> {
        let mut res = self
            .db
            .query("SELECT * FROM models WHERE model_id = $id")
            .bind(("id", model_id.0))
            .await?;
        let rows: Vec<DbModel> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or(StorageError::ModelNotFound {
                model_id: model_id.0,
            })?
            .into_row()
    }

    async fn find_model_by_digest(&self, digest: &str) -> StorageResult<Option<ModelRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM models WHERE digest = $digest")
            .bind(("digest", digest.to_string()))
            .await?;
        let rows: Vec<DbModel> = res.take(0)?;
        rows.into_iter().next().map(DbModel::into_row).transpose()
    }

    async fn find_models_by_name(&self, name: &str) -> StorageResult<Vec<ModelRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM models WHERE name = $name ORDER BY model_id")
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<DbModel> = res.take(0)?;
        rows.into_iter().map(DbModel::into_row).collect()
    }

    #[instrument(skip(self, def), fields(model = %def.name, digest = %def.digest))]
    async fn insert_model(&self, def: &ModelDef) -> StorageResult<ModelId> {
        if self.find_model_by_digest(&def.digest).await?.is_some() {
            return Err(StorageError::Duplicate {
                kind: "model",
                key: def.digest.clone(),
            });
        }
        let model_id = self.next_id("model").await?;
        let record = DbModel {
            model_id,
            name: def.name.clone(),
            digest: def.digest.clone(),
            def_json: serde_json::to_string(def)?,
        };
        let created: Option<DbModel> = self.db.create("models").content(record).await?;
        created.ok_or_else(|| StorageError::Backend("failed to create model".to_string()))?;
        debug!(model_id, "Model inserted");
        Ok(ModelId(model_id))
    }

    // -- runs ----------------------------------------------------------------

    async fn list_runs(&self, model_id: ModelId) -> StorageResult<Vec<RunRow>> {
        self.get_model(model_id).await?;
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE model_id = $model_id ORDER BY run_id")
            .bind(("model_id", model_id.0))
            .await?;
        let rows: Vec<DbRun> = res.take(0)?;
        rows.into_iter().map(DbRun::into_row).collect()
    }

    async fn get_run(&self, run_id: RunId) -> StorageResult<RunRow> {
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE run_id = $id")
            .bind(("id", run_id.0))
            .await?;
        let rows: Vec<DbRun> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or(StorageError::RunNotFound { run_id: run_id.0 })?
            .into_row()
    }

    async fn find_run_by_digest(
        &self,
        model_id: ModelId,
        digest: &str,
    ) -> StorageResult<Option<RunRow>> {
        let rows = self
            .fetch_runs(
                "SELECT * FROM runs WHERE model_id = $model_id AND digest = $key ORDER BY run_id",
                model_id.0,
                digest.to_string(),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_runs_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Vec<RunRow>> {
        self.fetch_runs(
            "SELECT * FROM runs WHERE model_id = $model_id AND name = $key ORDER BY run_id",
            model_id.0,
            name.to_string(),
        )
        .await
    }

    #[instrument(skip(self, meta), fields(run = %meta.name))]
    async fn insert_run(&self, model_id: ModelId, meta: &RunMeta) -> StorageResult<RunId> {
        self.get_model(model_id).await?;
        let run_id = RunId(self.next_id("run").await?);
        let record = DbRun::new(run_id, model_id, meta);
        let created: Option<DbRun> = self.db.create("runs").content(record).await?;
        created.ok_or_else(|| StorageError::Backend("failed to create run".to_string()))?;
        debug!(%run_id, "Run inserted");
        Ok(run_id)
    }

    async fn update_run(&self, run_id: RunId, meta: &RunMeta) -> StorageResult<()> {
        let existing = self.get_run(run_id).await?;
        let record = DbRun::new(run_id, existing.model_id, meta);
        let mut res = self
            .db
            .query("UPDATE runs MERGE $record WHERE run_id = $id RETURN AFTER")
            .bind(("record", record))
            .bind(("id", run_id.0))
            .await?;
        let updated: Vec<DbRun> = res.take(0)?;
        if updated.is_empty() {
            return Err(StorageError::RunNotFound { run_id: run_id.0 });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_run(&self, run_id: RunId) -> StorageResult<()> {
        let mut res = self
            .db
            .query("DELETE FROM runs WHERE run_id = $id RETURN BEFORE")
            .bind(("id", run_id.0))
            .await?;
        let deleted: Vec<DbRun> = res.take(0)?;
        if deleted.is_empty() {
            return Err(StorageError::RunNotFound { run_id: run_id.0 });
        }
        self.delete_values("run", run_id.0).await?;
        debug!("Run deleted with its values");
        Ok(())
    }

    async fn read_run_param(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<ParamCell>> {
        self.get_run(run_id).await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "param",
            hid,
        };
        Ok(self.read_values(key).await?.unwrap_or_default())
    }

    async fn write_run_param(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()> {
        let run = self.get_run(run_id).await?;
        self.require_hid(run.model_id, "parameter", hid, |m| {
            m.param_by_hid(hid).is_some()
        })
        .await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "param",
            hid,
        };
        self.write_values(key, cells).await
    }

    async fn read_run_table(&self, run_id: RunId, hid: Hid) -> StorageResult<TableValues> {
        self.get_run(run_id).await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "table",
            hid,
        };
        Ok(self.read_values(key).await?.unwrap_or_default())
    }

    async fn write_run_table(
        &self,
        run_id: RunId,
        hid: Hid,
        values: &TableValues,
    ) -> StorageResult<()> {
        let run = self.get_run(run_id).await?;
        self.require_hid(run.model_id, "output table", hid, |m| {
            m.table_by_hid(hid).is_some()
        })
        .await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "table",
            hid,
        };
        self.write_values(key, values).await
    }

    async fn read_run_microdata(&self, run_id: RunId, hid: Hid) -> StorageResult<Vec<MicroCell>> {
        self.get_run(run_id).await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "micro",
            hid,
        };
        Ok(self.read_values(key).await?.unwrap_or_default())
    }

    async fn write_run_microdata(
        &self,
        run_id: RunId,
        hid: Hid,
        cells: &[MicroCell],
    ) -> StorageResult<()> {
        let run = self.get_run(run_id).await?;
        self.require_hid(run.model_id, "entity", hid, |m| {
            m.entity_by_hid(hid).is_some()
        })
        .await?;
        let key = ValueKey {
            owner: "run",
            owner_id: run_id.0,
            kind: "micro",
            hid,
        };
        self.write_values(key, cells).await
    }

    // -- worksets ------------------------------------------------------------

    async fn list_worksets(&self, model_id: ModelId) -> StorageResult<Vec<WorksetRow>> {
        self.get_model(model_id).await?;
        let mut res = self
            .db
            .query("SELECT * FROM worksets WHERE model_id = $model_id ORDER BY set_id")
            .bind(("model_id", model_id.0))
            .await?;
        let rows: Vec<DbWorkset> = res.take(0)?;
        Ok(rows.into_iter().map(DbWorkset::into_row).collect())
    }

    async fn get_workset(&self, set_id: SetId) -> StorageResult<WorksetRow> {
        let mut res = self
            .db
            .query("SELECT * FROM worksets WHERE set_id = $id")
            .bind(("id", set_id.0))
            .await?;
        let rows: Vec<DbWorkset> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(DbWorkset::into_row)
            .ok_or(StorageError::WorksetNotFound { set_id: set_id.0 })
    }

    async fn find_workset_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<WorksetRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM worksets WHERE model_id = $model_id AND name = $name")
            .bind(("model_id", model_id.0))
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<DbWorkset> = res.take(0)?;
        Ok(rows.into_iter().next().map(DbWorkset::into_row))
    }

    #[instrument(skip(self, meta), fields(workset = %meta.name))]
    async fn insert_workset(&self, model_id: ModelId, meta: &WorksetMeta) -> StorageResult<SetId> {
        self.get_model(model_id).await?;
        if self.find_workset_by_name(model_id, &meta.name).await?.is_some() {
            return Err(StorageError::Duplicate {
                kind: "workset",
                key: meta.name.clone(),
            });
        }
        let set_id = SetId(self.next_id("set").await?);
        let record = DbWorkset::new(set_id, model_id, meta);
        let created: Option<DbWorkset> = self.db.create("worksets").content(record).await?;
        created.ok_or_else(|| StorageError::Backend("failed to create workset".to_string()))?;
        Ok(set_id)
    }

    async fn update_workset(&self, set_id: SetId, meta: &WorksetMeta) -> StorageResult<()> {
        let existing = self.get_workset(set_id).await?;
        let record = DbWorkset::new(set_id, existing.model_id, meta);
        let mut res = self
            .db
            .query("UPDATE worksets MERGE $record WHERE set_id = $id RETURN AFTER")
            .bind(("record", record))
            .bind(("id", set_id.0))
            .await?;
        let updated: Vec<DbWorkset> = res.take(0)?;
        if updated.is_empty() {
            return Err(StorageError::WorksetNotFound { set_id: set_id.0 });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_workset(&self, set_id: SetId) -> StorageResult<()> {
        let mut res = self
            .db
            .query("DELETE FROM worksets WHERE set_id = $id RETURN BEFORE")
            .bind(("id", set_id.0))
            .await?;
        let deleted: Vec<DbWorkset> = res.take(0)?;
        if deleted.is_empty() {
            return Err(StorageError::WorksetNotFound { set_id: set_id.0 });
        }
        self.delete_values("set", set_id.0).await
    }

    async fn clear_workset_values(&self, set_id: SetId) -> StorageResult<()> {
        if self.get_workset(set_id).await?.meta.is_readonly {
            return Err(StorageError::ReadonlyWorkset { set_id: set_id.0 });
        }
        self.delete_values("set", set_id.0).await
    }

    async fn read_workset_param(&self, set_id: SetId, hid: Hid) -> StorageResult<Vec<ParamCell>> {
        self.get_workset(set_id).await?;
        let key = ValueKey {
            owner: "set",
            owner_id: set_id.0,
            kind: "param",
            hid,
        };
        Ok(self.read_values(key).await?.unwrap_or_default())
    }

    async fn write_workset_param(
        &self,
        set_id: SetId,
        hid: Hid,
        cells: &[ParamCell],
    ) -> StorageResult<()> {
        let set = self.get_workset(set_id).await?;
        if set.meta.is_readonly {
            return Err(StorageError::ReadonlyWorkset { set_id: set_id.0 });
        }
        self.require_hid(set.model_id, "parameter", hid, |m| {
            m.param_by_hid(hid).is_some()
        })
        .await?;
        let key = ValueKey {
            owner: "set",
            owner_id: set_id.0,
            kind: "param",
            hid,
        };
        self.write_values(key, cells).await
    }

    // -- tasks ---------------------------------------------------------------

    async fn list_tasks(&self, model_id: ModelId) -> StorageResult<Vec<TaskRow>> {
        self.get_model(model_id).await?;
        let mut res = self
            .db
            .query("SELECT * FROM tasks WHERE model_id = $model_id ORDER BY task_id")
            .bind(("model_id", model_id.0))
            .await?;
        let rows: Vec<DbTask> = res.take(0)?;
        Ok(rows.into_iter().map(DbTask::into_row).collect())
    }

    async fn get_task(&self, task_id: TaskId) -> StorageResult<TaskRow> {
        let mut res = self
            .db
            .query("SELECT * FROM tasks WHERE task_id = $id")
            .bind(("id", task_id.0))
            .await?;
        let rows: Vec<DbTask> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(DbTask::into_row)
            .ok_or(StorageError::TaskNotFound { task_id: task_id.0 })
    }

    async fn find_task_by_name(
        &self,
        model_id: ModelId,
        name: &str,
    ) -> StorageResult<Option<TaskRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM tasks WHERE model_id = $model_id AND name = $name")
            .bind(("model_id", model_id.0))
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<DbTask> = res.take(0)?;
        Ok(rows.into_iter().next().map(DbTask::into_row))
    }

    #[instrument(skip(self, meta), fields(task = %meta.name))]
    async fn insert_task(&self, model_id: ModelId, meta: &TaskMeta) -> StorageResult<TaskId> {
        self.get_model(model_id).await?;
        if self.find_task_by_name(model_id, &meta.name).await?.is_some() {
            return Err(StorageError::Duplicate {
                kind: "task",
                key: meta.name.clone(),
            });
        }
        let task_id = TaskId(self.next_id("task").await?);
        let record = DbTask::new(task_id, model_id, meta);
        let created: Option<DbTask> = self.db.create("tasks").content(record).await?;
        created.ok_or_else(|| StorageError::Backend("failed to create task".to_string()))?;
        Ok(task_id)
    }

    async fn update_task(&self, task_id: TaskId, meta: &TaskMeta) -> StorageResult<()> {
        let existing = self.get_task(task_id).await?;
        let record = DbTask::new(task_id, existing.model_id, meta);
        let mut res = self
            .db
            .query("UPDATE tasks MERGE $record WHERE task_id = $id RETURN AFTER")
            .bind(("record", record))
            .bind(("id", task_id.0))
            .await?;
        let updated: Vec<DbTask> = res.take(0)?;
        if updated.is_empty() {
            return Err(StorageError::TaskNotFound { task_id: task_id.0 });
        }
        Ok(())
    }

    async fn list_task_runs(&self, task_id: TaskId) -> StorageResult<Vec<TaskRunRow>> {
        self.get_task(task_id).await?;
        let mut res = self
            .db
            .query("SELECT * FROM task_runs WHERE task_id = $id ORDER BY task_run_id")
            .bind(("id", task_id.0))
            .await?;
        let rows: Vec<DbTaskRun> = res.take(0)?;
        rows.into_iter().map(DbTaskRun::into_row).collect()
    }

    async fn insert_task_run(
        &self,
        task_id: TaskId,
        meta: &TaskRunMeta,
    ) -> StorageResult<TaskRunId> {
        self.get_task(task_id).await?;
        let task_run_id = self.next_id("task_run").await?;
        let record = DbTaskRun {
            task_run_id,
            task_id: task_id.0,
            name: meta.name.clone(),
            sub_count: meta.sub_count,
            status: meta.status.as_str().to_string(),
            create_date: meta.create_date,
            update_date: meta.update_date,
            run_stamp: meta.run_stamp.clone(),
            items: meta.items.clone(),
        };
        let created: Option<DbTaskRun> = self.db.create("task_runs").content(record).await?;
        created.ok_or_else(|| StorageError::Backend("failed to create task run".to_string()))?;
        Ok(TaskRunId(task_run_id))
    }
}
