//! Entity copiers and the report they fill in.
//!
//! Each copier reads one entity from a [`crate::PortableSource`], checks
//! eligibility and completeness, and materializes it through an
//! [`crate::EntitySink`]. Copiers record source to destination id
//! translations in the session [`SessionIds`](crate::SessionIds) so that
//! later copiers in the same session can follow references.

mod model;
mod run;
mod task;
mod workset;

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::sink::Placement;

pub(crate) use model::copy_model_def;
pub(crate) use run::copy_run;
pub(crate) use task::copy_task;
pub(crate) use workset::copy_workset;

/// An optional reference that could not be resolved at the destination.
///
/// The copy continues; the entity is written without the reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CopyWarning {
    BaseRunNotFound {
        workset: String,
        digest: String,
    },
    TaskSetNotFound {
        task: String,
        set: String,
    },
    TaskRunNotLinked {
        task: String,
        task_run: String,
        run: String,
    },
}

impl fmt::Display for CopyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyWarning::BaseRunNotFound { workset, digest } => write!(
                f,
                "base run not found for workset {workset}: no run with digest {digest}"
            ),
            CopyWarning::TaskSetNotFound { task, set } => {
                write!(f, "task copy incomplete: {task} body workset {set} not found")
            }
            CopyWarning::TaskRunNotLinked {
                task,
                task_run,
                run,
            } => write!(
                f,
                "task copy incomplete: {task} history {task_run} run {run} not found"
            ),
        }
    }
}

/// Result of copying one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityOutcome {
    pub name: String,
    pub placement: Placement,
    /// Destination id, for database destinations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_id: Option<i64>,
}

/// Summary of one copy invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub session: Uuid,
    pub stage: crate::CopyStage,
    pub model: Option<EntityOutcome>,
    pub runs: Vec<EntityOutcome>,
    pub worksets: Vec<EntityOutcome>,
    pub tasks: Vec<EntityOutcome>,
    pub warnings: Vec<CopyWarning>,
}

impl CopyReport {
    pub(crate) fn new(session: Uuid) -> Self {
        Self {
            session,
            stage: crate::CopyStage::Init,
            model: None,
            runs: Vec::new(),
            worksets: Vec::new(),
            tasks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Count of entities by placement, across runs, worksets and tasks.
    pub fn count(&self, placement: Placement) -> usize {
        self.runs
            .iter()
            .chain(&self.worksets)
            .chain(&self.tasks)
            .filter(|o| o.placement == placement)
            .count()
    }
}
