//! SurrealDB schema migrations and version check
//!
//! `init_schema` defines every table and index; it is idempotent and safe to
//! run on each connection. `check_schema_version` stamps a fresh store with
//! [`SCHEMA_VERSION`] and rejects a store stamped with any other version.

use serde::Deserialize;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::storage_traits::SCHEMA_VERSION;
use crate::Result;

/// Initialize all dbcopy tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing model store schema");

    init_meta_tables(db).await?;
    init_models_table(db).await?;
    init_runs_table(db).await?;
    init_value_tables(db).await?;
    init_worksets_table(db).await?;
    init_tasks_tables(db).await?;

    info!("Model store schema initialization complete");
    Ok(())
}

async fn run_ddl(db: &Surreal<Any>, sql: &str) -> Result<()> {
    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?
        .check()
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    Ok(())
}

/// `db_meta` holds the schema version; `id_lst` holds id counters.
///
/// ```text
/// db_meta:schema { version: INT }
/// id_lst:<kind>  { last: INT }   kind: model | run | set | task | task_run
/// ```
async fn init_meta_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing db_meta and id_lst tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS db_meta SCHEMALESS;
        DEFINE TABLE IF NOT EXISTS id_lst SCHEMALESS;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ meta tables initialized");
    Ok(())
}

/// Initialize `models` table
///
/// Schema:
/// ```text
/// TABLE models {
///   model_id:  INT (unique)
///   name:      STRING (indexed)
///   digest:    STRING (unique)
///   def_json:  STRING (serialized model definition)
/// }
/// ```
async fn init_models_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing models table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS models SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_model_id ON TABLE models COLUMNS model_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_model_digest ON TABLE models COLUMNS digest UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_model_name ON TABLE models COLUMNS name;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ models table initialized");
    Ok(())
}

/// Initialize `runs` table
///
/// Schema:
/// ```text
/// TABLE runs {
///   run_id:        INT (unique)
///   model_id:      INT (indexed)
///   name:          STRING (indexed with model_id)
///   sub_count:     INT
///   status:        STRING (running | success | error | exited)
///   create_date:   DATETIME
///   update_date:   DATETIME
///   digest:        STRING? (indexed with model_id)
///   value_digest:  STRING?
///   run_stamp:     STRING
///   options:       OBJECT
///   txt:           ARRAY
/// }
/// ```
///
/// Run digests are not unique: a digest is only assigned once values are
/// complete, and natural-key collisions are resolved by the copy engine.
async fn init_runs_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_run_model ON TABLE runs COLUMNS model_id;
        DEFINE INDEX IF NOT EXISTS idx_run_model_name ON TABLE runs COLUMNS model_id, name;
        DEFINE INDEX IF NOT EXISTS idx_run_model_digest ON TABLE runs COLUMNS model_id, digest;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ runs table initialized");
    Ok(())
}

/// Initialize `value_tables` table
///
/// One row per (owner, owner_id, kind, hid) value set:
/// ```text
/// TABLE value_tables {
///   owner:     STRING (run | set)
///   owner_id:  INT
///   kind:      STRING (param | table | micro)
///   hid:       INT
///   cells:     STRING (serialized cells)
/// }
/// ```
async fn init_value_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing value_tables table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS value_tables SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_value_key ON TABLE value_tables COLUMNS owner, owner_id, kind, hid UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_value_owner ON TABLE value_tables COLUMNS owner, owner_id;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ value_tables table initialized");
    Ok(())
}

/// Initialize `worksets` table
///
/// Schema:
/// ```text
/// TABLE worksets {
///   set_id:       INT (unique)
///   model_id:     INT
///   name:         STRING (unique within model)
///   is_readonly:  BOOL
///   base_run_id:  INT?
///   update_date:  DATETIME
///   params:       ARRAY
///   txt:          ARRAY
/// }
/// ```
async fn init_worksets_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing worksets table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS worksets SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_set_id ON TABLE worksets COLUMNS set_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_set_model_name ON TABLE worksets COLUMNS model_id, name UNIQUE;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ worksets table initialized");
    Ok(())
}

/// Initialize `tasks` and `task_runs` tables
///
/// Schema:
/// ```text
/// TABLE tasks {
///   task_id:   INT (unique)
///   model_id:  INT
///   name:      STRING (unique within model)
///   txt:       ARRAY
///   set_ids:   ARRAY<INT> (task body, ordered)
/// }
/// TABLE task_runs {
///   task_run_id:  INT (unique)
///   task_id:      INT (indexed)
///   name, sub_count, status, create_date, update_date, run_stamp
///   items:        ARRAY<{run_id, set_id}>
/// }
/// ```
async fn init_tasks_tables(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing tasks and task_runs tables");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tasks SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE tasks COLUMNS task_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_model_name ON TABLE tasks COLUMNS model_id, name UNIQUE;

        DEFINE TABLE IF NOT EXISTS task_runs SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_task_run_id ON TABLE task_runs COLUMNS task_run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_run_task ON TABLE task_runs COLUMNS task_id;
    "#;

    run_ddl(db, sql).await?;
    info!("✓ tasks tables initialized");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SchemaRow {
    version: u32,
}

/// Read the stored schema version, if the store has been stamped.
pub async fn read_schema_version(db: &Surreal<Any>) -> Result<Option<u32>> {
    let mut res = db.query("SELECT version FROM db_meta:schema").await?;
    let rows: Vec<SchemaRow> = res.take(0)?;
    Ok(rows.first().map(|r| r.version))
}

/// Stamp a fresh store, or verify the stamp of an existing one.
pub async fn check_schema_version(db: &Surreal<Any>) -> Result<()> {
    match read_schema_version(db).await? {
        None => {
            db.query("CREATE db_meta:schema SET version = $v")
                .bind(("v", SCHEMA_VERSION))
                .await?
                .check()?;
            info!(version = SCHEMA_VERSION, "Stamped new store with schema version");
            Ok(())
        }
        Some(found) if found == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(StateError::SchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        }),
    }
}
