//! Text repository: portable entities as JSON documents plus CSV value files.
//!
//! Layout under the repository root, all names sanitized for the file system:
//!
//! ```text
//! <model>.index.json              every document path in the repository
//! <model>.model.json
//! <model>.run.<key>.json          run.<key>/param/<P>.csv
//!                                 run.<key>/table/<T>.csv, <T>.acc.csv
//!                                 run.<key>/microdata/<E>.csv
//! <model>.set.<set>.json          set.<set>/<P>.csv
//! <model>.task.<task>.json
//! ```
//!
//! Run names are not unique, so a run key is `<run>.<short digest>`, or
//! `<run>` for a run without a digest. A key already held by another run
//! gets a `.2`, `.3`, ... suffix; runs without a digest always take a free
//! key.
//!
//! Every document lists the exact paths of its value files, and the index
//! lists the documents. Readers follow those lists and never scan the
//! directory, and refuse any listed path that leaves the repository root.

pub mod archive;

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use model_store::digest::short;
use model_store::{
    AccCell, EntityDef, ExprCell, MicroCell, ModelDef, ParamCell, ParamDef, RunId, SetId,
    TableDef, TableValues,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::codec::{self, CsvCell, Layout};
use crate::config::CodecConfig;
use crate::error::{CopyError, Result};
use crate::id_map::SessionIds;
use crate::portable::{
    PublicRun, PublicTask, PublicWorkset, RunEntry, TaskEntry, ValueFile, ValueKind, WorksetEntry,
};
use crate::sink::{EntitySink, Placement, RunSlot, TaskOutcome, WorksetSlot};
use crate::source::{ModelSelector, PortableSource};

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize(name: &str) -> String {
    let clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.is_empty() {
        "_".to_string()
    } else {
        clean
    }
}

/// Resolve a repository-relative path, refusing absolute paths and `..`.
fn confined(root: &Path, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    if rel.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(CopyError::Config(format!(
            "path {rel} is outside the repository"
        )));
    }
    Ok(root.join(path))
}

/// Document paths of one model's repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoIndex {
    pub model: String,
    #[serde(default)]
    pub runs: Vec<String>,
    #[serde(default)]
    pub worksets: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Two documents describe the same run only if both carry the same digest.
fn same_run(a: &PublicRun, b: &PublicRun) -> bool {
    matches!((&a.digest, &b.digest), (Some(x), Some(y)) if x == y)
}

fn push_unique(list: &mut Vec<String>, path: &str) {
    if !list.iter().any(|p| p == path) {
        list.push(path.to_string());
    }
}

/// A directory of portable documents and CSV files.
///
/// Acts as a [`PortableSource`] for import and as an [`EntitySink`] for
/// export. Writing an entity replaces any earlier document with the same
/// natural key.
pub struct TextRepo {
    root: PathBuf,
    cfg: CodecConfig,
}

impl TextRepo {
    pub fn new(root: impl Into<PathBuf>, cfg: CodecConfig) -> Self {
        Self {
            root: root.into(),
            cfg,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(model: &str) -> String {
        format!("{}.index.json", sanitize(model))
    }

    fn model_path(model: &str) -> String {
        format!("{}.model.json", sanitize(model))
    }

    fn run_path(model: &str, key: &str) -> String {
        format!("{}.run.{}.json", sanitize(model), key)
    }

    /// File key of a run: the key its document already has here, else the
    /// first free one.
    fn run_key(&self, model: &str, run: &PublicRun) -> Result<String> {
        let base = match &run.digest {
            Some(digest) => format!("{}.{}", sanitize(&run.name), sanitize(short(digest))),
            None => sanitize(&run.name),
        };
        let mut key = base.clone();
        let mut n = 1;
        while let Some(existing) = self.read_json::<PublicRun>(&Self::run_path(model, &key))? {
            if same_run(&existing, run) {
                break;
            }
            n += 1;
            key = format!("{base}.{n}");
        }
        Ok(key)
    }

    fn set_path(model: &str, set: &str) -> String {
        format!("{}.set.{}.json", sanitize(model), sanitize(set))
    }

    fn task_path(model: &str, task: &str) -> String {
        format!("{}.task.{}.json", sanitize(model), sanitize(task))
    }

    fn exists(&self, rel: &str) -> bool {
        confined(&self.root, rel).is_ok_and(|path| path.is_file())
    }

    fn read_bytes(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(confined(&self.root, rel)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, rel: &str) -> Result<Option<T>> {
        match self.read_bytes(rel)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_bytes(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        let path = confined(&self.root, rel)?;
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn write_json<T: Serialize>(&self, rel: &str, value: &T) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(value)?;
        bytes.push(b'\n');
        self.write_bytes(rel, &bytes)
    }

    fn reset_dir(&self, rel: &str) -> Result<()> {
        match fs::remove_dir_all(confined(&self.root, rel)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn index(&self, model: &str) -> Result<RepoIndex> {
        Ok(self
            .read_json(&Self::index_path(model))?
            .unwrap_or_else(|| RepoIndex {
                model: Self::model_path(model),
                ..RepoIndex::default()
            }))
    }

    fn update_index(&self, model: &str, update: impl FnOnce(&mut RepoIndex)) -> Result<()> {
        let mut index = self.index(model)?;
        update(&mut index);
        self.write_json(&Self::index_path(model), &index)
    }

    fn read_cells<C: CsvCell>(&self, layout: &Layout, file: Option<&ValueFile>) -> Result<Vec<C>> {
        let Some(file) = file else {
            return Ok(Vec::new());
        };
        let bytes = self
            .read_bytes(&file.path)?
            .ok_or_else(|| CopyError::not_found("value file", file.path.clone()))?;
        codec::decode(layout, &bytes, &self.cfg)
    }

    fn write_cells<C: CsvCell>(
        &self,
        layout: &Layout,
        cells: &[C],
        kind: ValueKind,
        rel: String,
        files: &mut Vec<ValueFile>,
    ) -> Result<()> {
        let bytes = codec::encode(layout, cells, &self.cfg)?;
        self.write_bytes(&rel, &bytes)?;
        files.retain(|f| !(f.kind == kind && f.name == layout.name()));
        files.push(ValueFile {
            kind,
            name: layout.name().to_string(),
            path: rel,
        });
        Ok(())
    }

    fn slot_dir(dir: &Option<String>) -> Result<&str> {
        dir.as_deref()
            .ok_or_else(|| CopyError::Config("text slot has no directory".to_string()))
    }
}

#[async_trait]
impl PortableSource for TextRepo {
    async fn model(&self, selector: &ModelSelector) -> Result<ModelDef> {
        let name = selector.name.as_deref().ok_or_else(|| {
            CopyError::Config("a model name is required to read a text repository".to_string())
        })?;
        let model: ModelDef = self
            .read_json(&Self::model_path(name))?
            .ok_or_else(|| CopyError::not_found("model", selector.to_string()))?;
        if let Some(digest) = &selector.digest {
            if &model.digest != digest {
                return Err(CopyError::not_found("model", selector.to_string()));
            }
        }
        Ok(model)
    }

    async fn runs(&self, model: &ModelDef) -> Result<Vec<RunEntry>> {
        let mut runs = Vec::new();
        for path in self.index(&model.name)?.runs {
            let doc: PublicRun = self
                .read_json(&path)?
                .ok_or_else(|| CopyError::not_found("run document", path.clone()))?;
            runs.push(RunEntry {
                doc,
                source_id: None,
            });
        }
        Ok(runs)
    }

    async fn run_param(
        &self,
        model: &ModelDef,
        run: &RunEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>> {
        let layout = Layout::param(model, param, &self.cfg)?;
        self.read_cells(&layout, run.doc.file(ValueKind::Param, &param.name))
    }

    async fn run_table(
        &self,
        model: &ModelDef,
        run: &RunEntry,
        table: &TableDef,
    ) -> Result<TableValues> {
        let exprs: Vec<ExprCell> = self.read_cells(
            &Layout::expr(model, table, &self.cfg)?,
            run.doc.file(ValueKind::Expr, &table.name),
        )?;
        let accs: Vec<AccCell> = self.read_cells(
            &Layout::acc(model, table, &self.cfg)?,
            run.doc.file(ValueKind::Acc, &table.name),
        )?;
        Ok(TableValues { exprs, accs })
    }

    async fn run_microdata(
        &self,
        model: &ModelDef,
        run: &RunEntry,
        entity: &EntityDef,
    ) -> Result<Vec<MicroCell>> {
        let layout = Layout::micro(model, entity, &self.cfg)?;
        self.read_cells(&layout, run.doc.file(ValueKind::Micro, &entity.name))
    }

    async fn worksets(&self, model: &ModelDef) -> Result<Vec<WorksetEntry>> {
        let mut sets = Vec::new();
        for path in self.index(&model.name)?.worksets {
            let doc: PublicWorkset = self
                .read_json(&path)?
                .ok_or_else(|| CopyError::not_found("workset document", path.clone()))?;
            sets.push(WorksetEntry {
                doc,
                source_id: None,
                base_run_source_id: None,
            });
        }
        Ok(sets)
    }

    async fn workset_param(
        &self,
        model: &ModelDef,
        set: &WorksetEntry,
        param: &ParamDef,
    ) -> Result<Vec<ParamCell>> {
        let layout = Layout::param(model, param, &self.cfg)?;
        self.read_cells(&layout, set.doc.file(&param.name))
    }

    async fn tasks(&self, model: &ModelDef) -> Result<Vec<TaskEntry>> {
        let mut tasks = Vec::new();
        for path in self.index(&model.name)?.tasks {
            let doc: PublicTask = self
                .read_json(&path)?
                .ok_or_else(|| CopyError::not_found("task document", path.clone()))?;
            tasks.push(TaskEntry::from_doc(doc));
        }
        Ok(tasks)
    }
}

#[async_trait]
impl EntitySink for TextRepo {
    async fn write_model(&self, model: &ModelDef) -> Result<Placement> {
        let path = Self::model_path(&model.name);
        let placement = match self.read_json::<ModelDef>(&path)? {
            Some(existing) if existing == *model => Placement::AlreadyExists,
            Some(_) => Placement::Replaced,
            None => Placement::Created,
        };
        if placement != Placement::AlreadyExists {
            self.write_json(&path, model)?;
        }
        self.update_index(&model.name, |index| index.model = path)?;
        Ok(placement)
    }

    async fn find_run(&self, _model: &ModelDef, _run: &PublicRun) -> Result<Option<RunId>> {
        Ok(None)
    }

    async fn begin_run(&self, model: &ModelDef, run: &PublicRun) -> Result<RunSlot> {
        let dir = format!("run.{}", self.run_key(&model.name, run)?);
        self.reset_dir(&dir)?;
        Ok(RunSlot {
            id: None,
            dir: Some(dir),
            files: Vec::new(),
        })
    }

    async fn put_run_param(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()> {
        let layout = Layout::param(model, param, &self.cfg)?;
        let rel = format!("{}/param/{}.csv", Self::slot_dir(&slot.dir)?, sanitize(&param.name));
        self.write_cells(&layout, cells, ValueKind::Param, rel, &mut slot.files)
    }

    async fn put_run_table(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        table: &TableDef,
        values: &TableValues,
    ) -> Result<()> {
        let dir = Self::slot_dir(&slot.dir)?.to_string();
        let name = sanitize(&table.name);
        let layout = Layout::expr(model, table, &self.cfg)?;
        let rel = format!("{dir}/table/{name}.csv");
        self.write_cells(&layout, &values.exprs, ValueKind::Expr, rel, &mut slot.files)?;
        if !values.accs.is_empty() {
            let layout = Layout::acc(model, table, &self.cfg)?;
            let rel = format!("{dir}/table/{name}.acc.csv");
            self.write_cells(&layout, &values.accs, ValueKind::Acc, rel, &mut slot.files)?;
        }
        Ok(())
    }

    async fn put_run_microdata(
        &self,
        model: &ModelDef,
        slot: &mut RunSlot,
        entity: &EntityDef,
        cells: &[MicroCell],
    ) -> Result<()> {
        let layout = Layout::micro(model, entity, &self.cfg)?;
        let rel = format!(
            "{}/microdata/{}.csv",
            Self::slot_dir(&slot.dir)?,
            sanitize(&entity.name)
        );
        self.write_cells(&layout, cells, ValueKind::Micro, rel, &mut slot.files)
    }

    async fn finish_run(
        &self,
        model: &ModelDef,
        slot: &RunSlot,
        run: &PublicRun,
    ) -> Result<Option<RunId>> {
        let mut doc = run.clone();
        doc.files = slot.files.clone();
        let key = Self::slot_dir(&slot.dir)?
            .strip_prefix("run.")
            .ok_or_else(|| CopyError::Config("run slot outside run directory".to_string()))?;
        let path = Self::run_path(&model.name, key);
        self.write_json(&path, &doc)?;
        self.update_index(&model.name, |index| push_unique(&mut index.runs, &path))?;
        debug!(run = %run.name, files = doc.files.len(), "run document written");
        Ok(None)
    }

    async fn abort_run(&self, _model: &ModelDef, slot: &RunSlot) -> Result<()> {
        match &slot.dir {
            Some(dir) => self.reset_dir(dir),
            None => Ok(()),
        }
    }

    async fn begin_workset(
        &self,
        model: &ModelDef,
        set: &WorksetEntry,
        _ids: &SessionIds,
    ) -> Result<WorksetSlot> {
        let dir = format!("set.{}", sanitize(&set.doc.name));
        self.reset_dir(&dir)?;
        Ok(WorksetSlot {
            dir: Some(dir),
            created: !self.exists(&Self::set_path(&model.name, &set.doc.name)),
            ..WorksetSlot::default()
        })
    }

    async fn put_workset_param(
        &self,
        model: &ModelDef,
        slot: &mut WorksetSlot,
        param: &ParamDef,
        cells: &[ParamCell],
    ) -> Result<()> {
        let layout = Layout::param(model, param, &self.cfg)?;
        let rel = format!("{}/{}.csv", Self::slot_dir(&slot.dir)?, sanitize(&param.name));
        self.write_cells(&layout, cells, ValueKind::Param, rel, &mut slot.files)
    }

    async fn finish_workset(
        &self,
        model: &ModelDef,
        slot: &WorksetSlot,
        set: &PublicWorkset,
    ) -> Result<Option<SetId>> {
        let mut doc = set.clone();
        doc.files = slot.files.clone();
        let path = Self::set_path(&model.name, &set.name);
        self.write_json(&path, &doc)?;
        self.update_index(&model.name, |index| push_unique(&mut index.worksets, &path))?;
        Ok(None)
    }

    async fn abort_workset(&self, _model: &ModelDef, slot: &WorksetSlot) -> Result<()> {
        match &slot.dir {
            Some(dir) => self.reset_dir(dir),
            None => Ok(()),
        }
    }

    async fn put_task(
        &self,
        model: &ModelDef,
        task: &TaskEntry,
        _ids: &SessionIds,
    ) -> Result<TaskOutcome> {
        let path = Self::task_path(&model.name, &task.doc.name);
        let placement = if self.exists(&path) {
            Placement::Replaced
        } else {
            Placement::Created
        };
        self.write_json(&path, &task.doc)?;
        self.update_index(&model.name, |index| push_unique(&mut index.tasks, &path))?;
        Ok(TaskOutcome {
            placement,
            id: None,
            warnings: Vec::new(),
        })
    }
}
