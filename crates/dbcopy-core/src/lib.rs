//! dbcopy core library
//!
//! Copies models, runs, worksets and tasks between model stores and text
//! repositories. Entities move in an id-free portable form and are matched
//! at the destination by natural key (digest or name), never by store id.

pub mod codec;
pub mod config;
mod copy;
mod error;
mod id_map;
mod orchestrator;
pub mod portable;
mod progress;
mod resolver;
mod sink;
mod source;
pub mod telemetry;
pub mod text;

pub use codec::format::DoubleFormat;
pub use config::{CodecConfig, CopyOptions, DEFAULT_PROGRESS_INTERVAL};
pub use copy::{CopyReport, CopyWarning, EntityOutcome};
pub use error::{CopyError, Result};
pub use id_map::{IdMap, SessionIds};
pub use orchestrator::{copy_model, copy_run, copy_task, copy_workset, CopyAborted, CopyStage};
pub use portable::{
    PublicRun, PublicSetParam, PublicTask, PublicTaskRun, PublicTaskRunItem, PublicWorkset,
    RunEntry, TaskEntry, ValueFile, ValueKind, WorksetEntry,
};
pub use progress::Progress;
pub use resolver::Resolver;
pub use sink::{DbSink, EntitySink, Placement, RunSlot, TaskOutcome, WorksetSlot};
pub use source::{DbSource, ModelSelector, PortableSource, RunSelector};
pub use telemetry::init_tracing;
pub use text::archive::{pack_dir, unpack};
pub use text::TextRepo;
