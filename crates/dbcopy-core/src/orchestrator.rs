//! Copy sessions: the entity copiers sequenced in dependency order.
//!
//! A session moves through `Init -> CopyModel -> CopyRuns -> CopyWorksets
//! -> CopyTasks -> Done`. Any fatal error ends it in `Abort`; entities
//! copied before the error stay in the destination and a rerun skips them.
//! Worksets always follow runs and tasks follow both, so references found
//! within one session resolve through its id maps.

use std::collections::HashSet;
use std::fmt;

use model_store::ModelDef;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::CopyOptions;
use crate::copy::{self, CopyReport};
use crate::error::{CopyError, Result};
use crate::id_map::SessionIds;
use crate::portable::{RunEntry, TaskEntry, WorksetEntry};
use crate::sink::EntitySink;
use crate::source::{ModelSelector, PortableSource, RunSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStage {
    Init,
    CopyModel,
    CopyRuns,
    CopyWorksets,
    CopyTasks,
    Done,
    Abort,
}

impl fmt::Display for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CopyStage::Init => "init",
            CopyStage::CopyModel => "copy model",
            CopyStage::CopyRuns => "copy runs",
            CopyStage::CopyWorksets => "copy worksets",
            CopyStage::CopyTasks => "copy tasks",
            CopyStage::Done => "done",
            CopyStage::Abort => "abort",
        })
    }
}

/// A copy that stopped on a fatal error.
///
/// `stage` is where the error happened; `report` holds what was copied
/// before it, with its stage set to `Abort`.
#[derive(Debug, thiserror::Error)]
#[error("copy aborted during {stage}")]
pub struct CopyAborted {
    pub stage: CopyStage,
    pub report: CopyReport,
    #[source]
    pub error: CopyError,
}

struct Session<'a> {
    source: &'a dyn PortableSource,
    sink: &'a dyn EntitySink,
    opts: &'a CopyOptions,
    stage: CopyStage,
    ids: SessionIds,
    report: CopyReport,
}

impl<'a> Session<'a> {
    fn new(source: &'a dyn PortableSource, sink: &'a dyn EntitySink, opts: &'a CopyOptions) -> Self {
        let id = Uuid::new_v4();
        Self {
            source,
            sink,
            opts,
            stage: CopyStage::Init,
            ids: SessionIds::default(),
            report: CopyReport::new(id),
        }
    }

    fn enter(&mut self, stage: CopyStage) {
        self.stage = stage;
        self.report.stage = stage;
    }

    fn finish(mut self, result: Result<()>) -> std::result::Result<CopyReport, CopyAborted> {
        match result {
            Ok(()) => {
                self.enter(CopyStage::Done);
                info!(
                    runs = self.report.runs.len(),
                    worksets = self.report.worksets.len(),
                    tasks = self.report.tasks.len(),
                    warnings = self.report.warnings.len(),
                    "copy done"
                );
                Ok(self.report)
            }
            Err(error) => {
                let stage = self.stage;
                self.enter(CopyStage::Abort);
                warn!(%stage, %error, "copy aborted");
                Err(CopyAborted {
                    stage,
                    report: self.report,
                    error,
                })
            }
        }
    }

    /// Check both sides, read the model and make sure the destination has it.
    async fn open(&mut self, selector: &ModelSelector) -> Result<ModelDef> {
        self.source.check_schema().await?;
        self.sink.check_schema().await?;
        let model = self.source.model(selector).await?;

        self.enter(CopyStage::CopyModel);
        let placement = copy::copy_model_def(self.sink, &model).await?;
        self.report.model = Some(copy::EntityOutcome {
            name: model.name.clone(),
            placement,
            dest_id: None,
        });
        Ok(model)
    }

    async fn runs(&mut self, model: &ModelDef, runs: &[RunEntry], skip_ineligible: bool) -> Result<()> {
        self.enter(CopyStage::CopyRuns);
        for entry in runs {
            if skip_ineligible && !entry.doc.status.is_completed() {
                info!(run = %entry.doc.label(), status = %entry.doc.status, "skipping run that is not completed");
                continue;
            }
            let outcome =
                copy::copy_run(self.source, self.sink, model, entry, &mut self.ids, self.opts).await?;
            self.report.runs.push(outcome);
        }
        Ok(())
    }

    async fn worksets(
        &mut self,
        model: &ModelDef,
        sets: &[WorksetEntry],
        skip_ineligible: bool,
    ) -> Result<()> {
        self.enter(CopyStage::CopyWorksets);
        for entry in sets {
            if skip_ineligible && !entry.doc.is_readonly {
                info!(workset = %entry.doc.name, "skipping workset that is not read-only");
                continue;
            }
            let outcome = copy::copy_workset(
                self.source,
                self.sink,
                model,
                entry,
                &mut self.ids,
                self.opts,
                &mut self.report.warnings,
            )
            .await?;
            self.report.worksets.push(outcome);
        }
        Ok(())
    }

    async fn tasks(&mut self, model: &ModelDef, tasks: &[TaskEntry]) -> Result<()> {
        self.enter(CopyStage::CopyTasks);
        for entry in tasks {
            let outcome =
                copy::copy_task(self.sink, model, entry, &self.ids, &mut self.report.warnings).await?;
            self.report.tasks.push(outcome);
        }
        Ok(())
    }

    async fn whole_model(&mut self, selector: &ModelSelector) -> Result<()> {
        let model = self.open(selector).await?;
        let runs = self.source.runs(&model).await?;
        self.runs(&model, &runs, true).await?;
        let sets = self.source.worksets(&model).await?;
        self.worksets(&model, &sets, true).await?;
        let tasks = self.source.tasks(&model).await?;
        self.tasks(&model, &tasks).await
    }

    async fn one_run(&mut self, selector: &ModelSelector, run: &RunSelector) -> Result<()> {
        let model = self.open(selector).await?;
        let entry = run.pick(self.source.runs(&model).await?)?;
        self.runs(&model, std::slice::from_ref(&entry), false).await
    }

    async fn one_workset(&mut self, selector: &ModelSelector, name: &str) -> Result<()> {
        let model = self.open(selector).await?;
        let entry = self
            .source
            .worksets(&model)
            .await?
            .into_iter()
            .find(|s| s.doc.name == name)
            .ok_or_else(|| CopyError::not_found("workset", name))?;
        self.worksets(&model, std::slice::from_ref(&entry), false).await
    }

    /// A task plus every run and workset its body and history name.
    async fn one_task(&mut self, selector: &ModelSelector, name: &str) -> Result<()> {
        let model = self.open(selector).await?;
        let task = self
            .source
            .tasks(&model)
            .await?
            .into_iter()
            .find(|t| t.doc.name == name)
            .ok_or_else(|| CopyError::not_found("task", name))?;

        let items = task.doc.history.iter().flat_map(|h| &h.items);
        let mut set_names: HashSet<&str> = task.doc.sets.iter().map(String::as_str).collect();
        let mut run_keys = Vec::new();
        for item in items {
            set_names.insert(&item.set_name);
            run_keys.push((item.run_name.as_str(), item.run_digest.as_deref()));
        }

        let runs: Vec<RunEntry> = self
            .source
            .runs(&model)
            .await?
            .into_iter()
            .filter(|r| {
                run_keys.iter().any(|(name, digest)| match digest {
                    Some(d) => r.doc.digest.as_deref() == Some(*d),
                    None => r.doc.name == *name,
                })
            })
            .collect();
        self.runs(&model, &runs, true).await?;

        let sets: Vec<_> = self
            .source
            .worksets(&model)
            .await?
            .into_iter()
            .filter(|s| set_names.contains(s.doc.name.as_str()))
            .collect();
        self.worksets(&model, &sets, true).await?;

        self.tasks(&model, std::slice::from_ref(&task)).await
    }
}

/// Copy a model with all completed runs, read-only worksets and tasks.
pub async fn copy_model(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    selector: &ModelSelector,
    opts: &CopyOptions,
) -> std::result::Result<CopyReport, CopyAborted> {
    let mut session = Session::new(source, sink, opts);
    let span = info_span!("copy", session = %session.report.session, model = %selector);
    let result = session.whole_model(selector).instrument(span).await;
    session.finish(result)
}

/// Copy one run. The run must be completed.
pub async fn copy_run(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    selector: &ModelSelector,
    run: &RunSelector,
    opts: &CopyOptions,
) -> std::result::Result<CopyReport, CopyAborted> {
    let mut session = Session::new(source, sink, opts);
    let span = info_span!("copy", session = %session.report.session, model = %selector, run = %run);
    let result = session.one_run(selector, run).instrument(span).await;
    session.finish(result)
}

/// Copy one read-only workset. Its base run is linked if the destination
/// already has it.
pub async fn copy_workset(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    selector: &ModelSelector,
    name: &str,
    opts: &CopyOptions,
) -> std::result::Result<CopyReport, CopyAborted> {
    let mut session = Session::new(source, sink, opts);
    let span = info_span!("copy", session = %session.report.session, model = %selector, workset = name);
    let result = session.one_workset(selector, name).instrument(span).await;
    session.finish(result)
}

/// Copy a task with the runs and worksets it references.
pub async fn copy_task(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    selector: &ModelSelector,
    name: &str,
    opts: &CopyOptions,
) -> std::result::Result<CopyReport, CopyAborted> {
    let mut session = Session::new(source, sink, opts);
    let span = info_span!("copy", session = %session.report.session, model = %selector, task = name);
    let result = session.one_task(selector, name).instrument(span).await;
    session.finish(result)
}
