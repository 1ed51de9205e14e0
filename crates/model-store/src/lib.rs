//! Model store: SurrealDB persistence for models, runs, worksets and tasks
//!
//! This crate is the storage layer the dbcopy engine reads from and writes
//! to. It owns the model schema types, the `ModelStore` trait, a SurrealDB
//! implementation and an in-memory fake.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: store-local ids, value replacement semantics and schema versioning.
//!
//! ## Key Components
//!
//! - `ModelStore`: async storage trait used by every copy operation
//! - `SurrealModelStore`: SurrealDB backend (`mem://`, `surrealkv://`, `ws://`)
//! - `MemoryModelStore`: in-memory fake with failure injection
//! - `ModelDef`: structural model definition keyed by harmonized ids

pub mod digest;
mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod schema;
pub mod storage_traits;
mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{Credentials, StoreConfig, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use schema::{
    AccCell, AccDef, AttrDef, CellValue, DescrNote, DimDef, EntityDef, EnumItem, ExprCell,
    ExprDef, Hid, MicroCell, ModelDef, ParamCell, ParamDef, TableDef, TableValues, TypeDef,
    TypeKind,
};
pub use storage_traits::{
    ModelId, ModelRow, ModelStore, RunDigests, RunId, RunMeta, RunRow, RunStatus, SetId,
    StorageResult, TaskId, TaskMeta, TaskRow, TaskRunId, TaskRunItem, TaskRunMeta, TaskRunRow,
    WorksetMeta, WorksetParam, WorksetRow, SCHEMA_VERSION,
};
pub use surreal_store::SurrealModelStore;

/// Result type for model-store connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
