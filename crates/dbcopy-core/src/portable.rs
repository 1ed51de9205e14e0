//! Portable form of runs, worksets and tasks.
//!
//! Portable documents carry natural keys only: model name and digest, run
//! name and digest, workset and task names. Store-local ids never appear in
//! a document. The same documents are written to JSON files and used as the
//! in-memory form of a database to database copy.
//!
//! The `*Entry` types pair a document with the ids it had in a source
//! store, when there is one. Those ids key the session [`crate::IdMap`]s and
//! are never serialized.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use model_store::{
    DescrNote, ModelDef, RunId, RunMeta, RunRow, RunStatus, SetId, TaskId, TaskRunItem,
    TaskRunRow, WorksetMeta, WorksetParam, WorksetRow,
};
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Kind of a value file listed in a document manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Param,
    Expr,
    Acc,
    Micro,
}

/// One value file owned by a document, relative to the repository root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueFile {
    pub kind: ValueKind,
    /// Parameter, output table or entity name
    pub name: String,
    pub path: String,
}

fn find_file<'a>(files: &'a [ValueFile], kind: ValueKind, name: &str) -> Option<&'a ValueFile> {
    files.iter().find(|f| f.kind == kind && f.name == name)
}

fn check_model(model: &ModelDef, doc_model: &str, doc_digest: &str, what: &str) -> Result<()> {
    if model.digest == doc_digest {
        Ok(())
    } else {
        Err(CopyError::SchemaMismatch(format!(
            "{what} belongs to model {doc_model} ({doc_digest}), not {} ({})",
            model.name, model.digest
        )))
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicRun {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    pub sub_count: i32,
    pub status: RunStatus,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub value_digest: Option<String>,
    #[serde(default)]
    pub run_stamp: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ValueFile>,
}

impl PublicRun {
    pub fn from_row(model: &ModelDef, row: &RunRow) -> Self {
        let meta = &row.meta;
        Self {
            model_name: model.name.clone(),
            model_digest: model.digest.clone(),
            name: meta.name.clone(),
            sub_count: meta.sub_count,
            status: meta.status,
            create_date: meta.create_date,
            update_date: meta.update_date,
            digest: meta.digest.clone(),
            value_digest: meta.value_digest.clone(),
            run_stamp: meta.run_stamp.clone(),
            options: meta.options.clone(),
            txt: meta.txt.clone(),
            files: Vec::new(),
        }
    }

    /// Store metadata for this run with the given status and digests.
    pub fn to_meta(
        &self,
        status: RunStatus,
        digest: Option<String>,
        value_digest: Option<String>,
    ) -> RunMeta {
        RunMeta {
            name: self.name.clone(),
            sub_count: self.sub_count,
            status,
            create_date: self.create_date,
            update_date: self.update_date,
            digest,
            value_digest,
            run_stamp: self.run_stamp.clone(),
            options: self.options.clone(),
            txt: self.txt.clone(),
        }
    }

    /// Name and short digest, for logs and warnings.
    pub fn label(&self) -> String {
        match &self.digest {
            Some(d) => format!("{} ({})", self.name, model_store::digest::short(d)),
            None => self.name.clone(),
        }
    }

    pub fn file(&self, kind: ValueKind, name: &str) -> Option<&ValueFile> {
        find_file(&self.files, kind, name)
    }

    pub fn check_model(&self, model: &ModelDef) -> Result<()> {
        check_model(model, &self.model_name, &self.model_digest, &self.label())
    }
}

#[derive(Debug, Clone)]
pub struct RunEntry {
    pub doc: PublicRun,
    pub source_id: Option<RunId>,
}

// ---------------------------------------------------------------------------
// Worksets
// ---------------------------------------------------------------------------

/// A parameter declared in a workset, by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSetParam {
    pub name: String,
    pub sub_count: i32,
    pub default_sub_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicWorkset {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    pub is_readonly: bool,
    /// Digest of the base run; never a store id
    #[serde(default)]
    pub base_run_digest: Option<String>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub params: Vec<PublicSetParam>,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<ValueFile>,
}

impl PublicWorkset {
    pub fn from_row(model: &ModelDef, row: &WorksetRow, base_run_digest: Option<String>) -> Self {
        let meta = &row.meta;
        Self {
            model_name: model.name.clone(),
            model_digest: model.digest.clone(),
            name: meta.name.clone(),
            is_readonly: meta.is_readonly,
            base_run_digest,
            update_date: meta.update_date,
            params: meta
                .params
                .iter()
                .filter_map(|p| {
                    model.param_by_hid(p.hid).map(|def| PublicSetParam {
                        name: def.name.clone(),
                        sub_count: p.sub_count,
                        default_sub_id: p.default_sub_id,
                    })
                })
                .collect(),
            txt: meta.txt.clone(),
            files: Vec::new(),
        }
    }

    /// Store metadata for this workset; parameters are mapped to hids.
    pub fn to_meta(
        &self,
        model: &ModelDef,
        base_run_id: Option<RunId>,
        is_readonly: bool,
    ) -> Result<WorksetMeta> {
        let params = self
            .params
            .iter()
            .map(|p| {
                let def = model.param_by_name(&p.name).ok_or_else(|| {
                    CopyError::not_found("parameter", format!("{} in workset {}", p.name, self.name))
                })?;
                Ok(WorksetParam {
                    hid: def.hid,
                    sub_count: p.sub_count,
                    default_sub_id: p.default_sub_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(WorksetMeta {
            name: self.name.clone(),
            is_readonly,
            base_run_id,
            update_date: self.update_date,
            params,
            txt: self.txt.clone(),
        })
    }

    pub fn file(&self, name: &str) -> Option<&ValueFile> {
        find_file(&self.files, ValueKind::Param, name)
    }

    pub fn check_model(&self, model: &ModelDef) -> Result<()> {
        check_model(model, &self.model_name, &self.model_digest, &self.name)
    }
}

#[derive(Debug, Clone)]
pub struct WorksetEntry {
    pub doc: PublicWorkset,
    pub source_id: Option<SetId>,
    pub base_run_source_id: Option<RunId>,
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// One (workset, run) pair of a task run, by natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicTaskRunItem {
    pub run_name: String,
    #[serde(default)]
    pub run_digest: Option<String>,
    pub set_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTaskRun {
    pub name: String,
    pub sub_count: i32,
    pub status: RunStatus,
    pub create_date: DateTime<Utc>,
    pub update_date: DateTime<Utc>,
    #[serde(default)]
    pub run_stamp: String,
    #[serde(default)]
    pub items: Vec<PublicTaskRunItem>,
}

impl PublicTaskRun {
    /// Key used to deduplicate task run history.
    pub fn history_key(&self) -> (String, String) {
        (self.name.clone(), self.run_stamp.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicTask {
    pub model_name: String,
    pub model_digest: String,
    pub name: String,
    #[serde(default)]
    pub txt: Vec<DescrNote>,
    /// Task body: workset names in execution order
    #[serde(default)]
    pub sets: Vec<String>,
    #[serde(default)]
    pub history: Vec<PublicTaskRun>,
}

impl PublicTask {
    pub fn check_model(&self, model: &ModelDef) -> Result<()> {
        check_model(model, &self.model_name, &self.model_digest, &self.name)
    }
}

#[derive(Debug, Clone)]
pub struct TaskEntry {
    pub doc: PublicTask,
    pub source_id: Option<TaskId>,
    /// Source ids of `doc.sets`, index-aligned; empty when read from text
    pub body_ids: Vec<SetId>,
    /// Source ids of every history item, index-aligned with `doc.history`
    pub history_ids: Vec<Vec<TaskRunItem>>,
}

impl TaskEntry {
    /// A task read from text, without source ids.
    pub fn from_doc(doc: PublicTask) -> Self {
        Self {
            doc,
            source_id: None,
            body_ids: Vec::new(),
            history_ids: Vec::new(),
        }
    }

    pub fn body_source_id(&self, i: usize) -> Option<SetId> {
        self.body_ids.get(i).copied()
    }

    pub fn item_source_ids(&self, history: usize, item: usize) -> Option<TaskRunItem> {
        self.history_ids.get(history)?.get(item).copied()
    }
}

/// Project a stored task run, naming its runs and worksets.
pub(crate) fn project_task_run(
    row: &TaskRunRow,
    run_key: impl Fn(RunId) -> Option<(String, Option<String>)>,
    set_name: impl Fn(SetId) -> Option<String>,
) -> (PublicTaskRun, Vec<TaskRunItem>) {
    let mut items = Vec::new();
    let mut ids = Vec::new();
    for item in &row.meta.items {
        if let (Some((run_name, run_digest)), Some(set)) = (run_key(item.run_id), set_name(item.set_id)) {
            items.push(PublicTaskRunItem {
                run_name,
                run_digest,
                set_name: set,
            });
            ids.push(*item);
        }
    }
    let meta = &row.meta;
    let doc = PublicTaskRun {
        name: meta.name.clone(),
        sub_count: meta.sub_count,
        status: meta.status,
        create_date: meta.create_date,
        update_date: meta.update_date,
        run_stamp: meta.run_stamp.clone(),
        items,
    };
    (doc, ids)
}
