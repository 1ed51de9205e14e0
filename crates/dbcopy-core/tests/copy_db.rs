mod common;

use common::*;
use dbcopy_core::{
    copy_model, copy_run, copy_task, copy_workset, CopyError, CopyOptions, CopyStage, CopyWarning,
    DbSink, DbSource, ModelSelector, Placement, RunSelector,
};
use model_store::fakes::MemoryModelStore;
use model_store::{ModelStore, RunStatus, StorageError, SCHEMA_VERSION};

fn m1() -> ModelSelector {
    ModelSelector::by_name("M1").with_digest("d1")
}

fn opts() -> CopyOptions {
    CopyOptions::default()
}

async fn dest_model_id(dest: &MemoryModelStore) -> model_store::ModelId {
    dest.find_model_by_digest("d1")
        .await
        .expect("lookup")
        .expect("model copied")
        .model_id
}

// ---------------------------------------------------------------------------
// Whole-model copy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn whole_model_copy_translates_base_run() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();

    let report = copy_model(&DbSource::new(&src.store), &DbSink::new(&dest), &m1(), &opts())
        .await
        .expect("copy model");

    assert_eq!(report.stage, CopyStage::Done);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.model.as_ref().map(|m| m.placement), Some(Placement::Created));
    assert_eq!(dest.list_models().await.unwrap().len(), 1);
    assert_eq!(dest.run_count(), 1);
    assert_eq!(dest.workset_count(), 1);

    let model_id = dest_model_id(&dest).await;
    let run = dest
        .find_run_by_digest(model_id, "rA")
        .await
        .unwrap()
        .expect("run rA copied");
    assert_ne!(run.run_id, src.run_id);
    assert_eq!(run.meta.status, RunStatus::Success);
    assert_eq!(run.meta.value_digest.as_deref(), Some("rA-values"));
    assert_eq!(run.meta.txt[0].descr, "run R1");
    assert_eq!(dest.read_run_param(run.run_id, P1).await.unwrap(), p1_cells(1.0));
    assert_eq!(dest.read_run_param(run.run_id, P2).await.unwrap(), p2_cells(20));
    assert_eq!(dest.read_run_table(run.run_id, T1).await.unwrap(), table_values());
    assert_eq!(
        dest.read_run_microdata(run.run_id, PERSON).await.unwrap(),
        micro_cells()
    );

    let set = dest
        .find_workset_by_name(model_id, "W1")
        .await
        .unwrap()
        .expect("W1 copied");
    assert!(set.meta.is_readonly);
    assert_eq!(set.meta.base_run_id, Some(run.run_id));
    assert_eq!(dest.read_workset_param(set.set_id, P1).await.unwrap(), p1_cells(2.0));
}

#[tokio::test]
async fn whole_model_copy_skips_ineligible_entities() {
    let src = seeded().await;
    seed_run(&src.store, src.model_id, "busy", None, RunStatus::Running, true).await;
    seed_workset(&src.store, src.model_id, "draft", None, false).await;
    let dest = MemoryModelStore::new();

    let report = copy_model(&DbSource::new(&src.store), &DbSink::new(&dest), &m1(), &opts())
        .await
        .expect("copy model");

    assert_eq!(report.runs.len(), 1);
    assert_eq!(report.worksets.len(), 1);
    assert_eq!(dest.run_count(), 1);
    assert_eq!(dest.workset_count(), 1);
}

#[tokio::test]
async fn second_whole_model_copy_reuses_runs() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();
    let source = DbSource::new(&src.store);
    let sink = DbSink::new(&dest);

    copy_model(&source, &sink, &m1(), &opts()).await.expect("first");
    let report = copy_model(&source, &sink, &m1(), &opts()).await.expect("second");

    assert_eq!(report.model.as_ref().map(|m| m.placement), Some(Placement::AlreadyExists));
    assert_eq!(report.runs[0].placement, Placement::AlreadyExists);
    assert_eq!(report.worksets[0].placement, Placement::Replaced);
    assert!(report.warnings.is_empty());
    assert_eq!(dest.run_count(), 1);
    assert_eq!(dest.workset_count(), 1);

    // the replaced workset still points at the one copied run
    let model_id = dest_model_id(&dest).await;
    let run = dest.find_run_by_digest(model_id, "rA").await.unwrap().unwrap();
    let set = dest.find_workset_by_name(model_id, "W1").await.unwrap().unwrap();
    assert_eq!(set.meta.base_run_id, Some(run.run_id));
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_copy_is_idempotent() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();
    let source = DbSource::new(&src.store);
    let sink = DbSink::new(&dest);
    let by_digest = RunSelector::Digest("rA".to_string());

    let first = copy_run(&source, &sink, &m1(), &by_digest, &opts())
        .await
        .expect("first copy");
    assert_eq!(first.runs[0].placement, Placement::Created);

    let second = copy_run(&source, &sink, &m1(), &by_digest, &opts())
        .await
        .expect("second copy");
    assert_eq!(second.runs[0].placement, Placement::AlreadyExists);
    assert_eq!(second.runs[0].dest_id, first.runs[0].dest_id);
    assert_eq!(dest.run_count(), 1);
}

#[tokio::test]
async fn run_without_digest_gets_one_computed() {
    let src = seeded().await;
    seed_run(&src.store, src.model_id, "R2", None, RunStatus::Exited, true).await;
    let dest = MemoryModelStore::new();

    let report = copy_run(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        &RunSelector::Last,
        &opts(),
    )
    .await
    .expect("copy");

    let run_id = model_store::RunId(report.runs[0].dest_id.expect("dest id"));
    let run = dest.get_run(run_id).await.unwrap();
    assert_eq!(run.meta.name, "R2");
    assert_eq!(run.meta.status, RunStatus::Exited);
    let computed = dest.compute_run_digest(run_id).await.unwrap();
    assert_eq!(run.meta.digest, Some(computed.digest));
    assert_eq!(run.meta.value_digest, Some(computed.value_digest));
}

#[tokio::test]
async fn run_missing_parameter_is_incomplete() {
    let src = seeded().await;
    seed_run(&src.store, src.model_id, "partial", Some("rP"), RunStatus::Success, false).await;
    let dest = MemoryModelStore::new();

    let aborted = copy_run(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        &RunSelector::Name("partial".to_string()),
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert!(matches!(
        aborted.error,
        CopyError::IncompleteData { kind: "run", .. }
    ));
    assert_eq!(aborted.stage, CopyStage::CopyRuns);
    assert_eq!(aborted.report.stage, CopyStage::Abort);
    assert_eq!(dest.run_count(), 0);
}

#[tokio::test]
async fn failed_value_write_removes_partial_run() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();
    dest.fail_param_writes_for(P2);

    let aborted = copy_run(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        &RunSelector::First,
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert!(matches!(
        aborted.error,
        CopyError::Storage(StorageError::Injected(_))
    ));
    assert_eq!(dest.run_count(), 0);
    // the model row is kept; only the run is rolled back
    assert_eq!(dest.list_models().await.unwrap().len(), 1);
}

#[tokio::test]
async fn running_run_is_not_eligible() {
    let src = seeded().await;
    seed_run(&src.store, src.model_id, "busy", None, RunStatus::Running, true).await;
    let dest = MemoryModelStore::new();

    let aborted = copy_run(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        &RunSelector::Name("busy".to_string()),
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert!(matches!(aborted.error, CopyError::NotEligible { kind: "run", .. }));
    assert_eq!(dest.run_count(), 0);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();

    let aborted = copy_run(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        &RunSelector::Digest("nope".to_string()),
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert_eq!(aborted.error.to_string(), "run not found: digest nope");
}

// ---------------------------------------------------------------------------
// Worksets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn workset_alone_warns_when_base_run_missing() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();

    let report = copy_workset(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        "W1",
        &opts(),
    )
    .await
    .expect("copy workset");

    assert_eq!(
        report.warnings,
        vec![CopyWarning::BaseRunNotFound {
            workset: "W1".to_string(),
            digest: "rA".to_string(),
        }]
    );
    assert_eq!(report.worksets[0].placement, Placement::Created);
    let model_id = dest_model_id(&dest).await;
    let set = dest.find_workset_by_name(model_id, "W1").await.unwrap().unwrap();
    assert_eq!(set.meta.base_run_id, None);
    assert!(set.meta.is_readonly);
}

#[tokio::test]
async fn workset_base_run_resolves_by_digest() {
    let src = seeded().await;
    let dest = MemoryModelStore::with_id_offset(50);
    let source = DbSource::new(&src.store);
    let sink = DbSink::new(&dest);

    // run copied in an earlier, separate session
    let run_report = copy_run(&source, &sink, &m1(), &RunSelector::First, &opts())
        .await
        .expect("copy run");
    let report = copy_workset(&source, &sink, &m1(), "W1", &opts())
        .await
        .expect("copy workset");

    assert!(report.warnings.is_empty());
    let model_id = dest_model_id(&dest).await;
    let set = dest.find_workset_by_name(model_id, "W1").await.unwrap().unwrap();
    assert_eq!(
        set.meta.base_run_id.map(|id| id.0),
        run_report.runs[0].dest_id
    );
}

#[tokio::test]
async fn failed_workset_copy_leaves_no_readonly_set() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();
    dest.fail_param_writes_for(P2);

    let aborted = copy_workset(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        "W1",
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert_eq!(aborted.stage, CopyStage::CopyWorksets);
    assert_eq!(dest.workset_count(), 0);
}

#[tokio::test]
async fn failed_recopy_leaves_existing_set_writable() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();
    let source = DbSource::new(&src.store);
    let sink = DbSink::new(&dest);

    copy_workset(&source, &sink, &m1(), "W1", &opts())
        .await
        .expect("first copy");
    dest.fail_param_writes_for(P2);
    copy_workset(&source, &sink, &m1(), "W1", &opts())
        .await
        .expect_err("second copy must fail");

    let model_id = dest_model_id(&dest).await;
    let set = dest.find_workset_by_name(model_id, "W1").await.unwrap().unwrap();
    assert!(!set.meta.is_readonly);
    assert!(dest.read_workset_param(set.set_id, P2).await.unwrap().is_empty());
}

#[tokio::test]
async fn workset_values_are_replaced_not_merged() {
    let src = seeded().await;
    // source W2 declares only P1
    let w2 = src
        .store
        .insert_workset(src.model_id, &workset_meta("W2", false, None, &[P1]))
        .await
        .unwrap();
    src.store.write_workset_param(w2, P1, &p1_cells(3.0)).await.unwrap();
    src.store
        .update_workset(w2, &workset_meta("W2", true, None, &[P1]))
        .await
        .unwrap();

    // destination already has a writable W2 with both parameters
    let dest = MemoryModelStore::new();
    let dest_model = seed_model(&dest).await;
    let existing = seed_workset(&dest, dest_model, "W2", None, false).await;

    let report = copy_workset(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        "W2",
        &opts(),
    )
    .await
    .expect("copy workset");

    assert_eq!(report.worksets[0].placement, Placement::Replaced);
    assert!(report.warnings.is_empty());
    let set = dest.get_workset(existing).await.unwrap();
    assert!(set.meta.is_readonly);
    assert_eq!(set.meta.params.len(), 1);
    assert_eq!(dest.read_workset_param(existing, P1).await.unwrap(), p1_cells(3.0));
    assert!(dest.read_workset_param(existing, P2).await.unwrap().is_empty());
}

#[tokio::test]
async fn readonly_workset_without_parameters_is_copied() {
    let src = seeded().await;
    src.store
        .insert_workset(src.model_id, &workset_meta("Empty", true, None, &[]))
        .await
        .expect("insert empty workset");
    let dest = MemoryModelStore::new();

    let report = copy_model(&DbSource::new(&src.store), &DbSink::new(&dest), &m1(), &opts())
        .await
        .expect("whole-model copy");

    assert_eq!(report.stage, CopyStage::Done);
    assert_eq!(report.worksets.len(), 2);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let model_id = dest_model_id(&dest).await;
    let set = dest
        .find_workset_by_name(model_id, "Empty")
        .await
        .unwrap()
        .expect("empty workset copied");
    assert!(set.meta.is_readonly);
    assert!(set.meta.params.is_empty());
}

#[tokio::test]
async fn writable_workset_is_not_eligible() {
    let src = seeded().await;
    seed_workset(&src.store, src.model_id, "draft", None, false).await;
    let dest = MemoryModelStore::new();

    let aborted = copy_workset(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &m1(),
        "draft",
        &opts(),
    )
    .await
    .expect_err("copy must fail");

    assert!(matches!(
        aborted.error,
        CopyError::NotEligible { kind: "workset", .. }
    ));
    assert_eq!(dest.workset_count(), 0);
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn task_copy_brings_dependencies_and_dedupes_history() {
    let src = seeded().await;
    seed_task(&src.store, src.model_id, src.set_id, &[src.run_id]).await;
    let dest = MemoryModelStore::new();
    let source = DbSource::new(&src.store);
    let sink = DbSink::new(&dest);

    let report = copy_task(&source, &sink, &m1(), "T1", &opts())
        .await
        .expect("copy task");

    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(report.runs.len(), 1);
    assert_eq!(report.worksets.len(), 1);
    assert_eq!(report.tasks[0].placement, Placement::Created);

    let model_id = dest_model_id(&dest).await;
    let task = dest.find_task_by_name(model_id, "T1").await.unwrap().unwrap();
    let run = dest.find_run_by_digest(model_id, "rA").await.unwrap().unwrap();
    let set = dest.find_workset_by_name(model_id, "W1").await.unwrap().unwrap();
    assert_eq!(task.meta.set_ids, vec![set.set_id]);

    let history = dest.list_task_runs(task.task_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].meta.items.len(), 1);
    assert_eq!(history[0].meta.items[0].run_id, run.run_id);
    assert_eq!(history[0].meta.items[0].set_id, set.set_id);

    let again = copy_task(&source, &sink, &m1(), "T1", &opts())
        .await
        .expect("copy task again");
    assert_eq!(again.tasks[0].placement, Placement::Replaced);
    assert_eq!(dest.list_task_runs(task.task_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn task_history_with_uncopied_run_warns() {
    let src = seeded().await;
    let busy = seed_run(&src.store, src.model_id, "busy", None, RunStatus::Running, true).await;
    seed_task(&src.store, src.model_id, src.set_id, &[src.run_id, busy]).await;
    let dest = MemoryModelStore::new();

    let report = copy_model(&DbSource::new(&src.store), &DbSink::new(&dest), &m1(), &opts())
        .await
        .expect("copy model");

    assert_eq!(
        report.warnings,
        vec![CopyWarning::TaskRunNotLinked {
            task: "T1".to_string(),
            task_run: "taskRun1".to_string(),
            run: "busy".to_string(),
        }]
    );
    let model_id = dest_model_id(&dest).await;
    let task = dest.find_task_by_name(model_id, "T1").await.unwrap().unwrap();
    let history = dest.list_task_runs(task.task_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].meta.items.len(), 1);
}

// ---------------------------------------------------------------------------
// Session failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn incompatible_destination_aborts_before_copy() {
    let src = seeded().await;
    let dest = MemoryModelStore::with_schema_version(SCHEMA_VERSION + 1);

    let aborted = copy_model(&DbSource::new(&src.store), &DbSink::new(&dest), &m1(), &opts())
        .await
        .expect_err("copy must abort");

    assert!(matches!(aborted.error, CopyError::SchemaMismatch(_)));
    assert_eq!(aborted.stage, CopyStage::Init);
    assert_eq!(aborted.report.stage, CopyStage::Abort);
    assert!(aborted.report.model.is_none());
    assert!(dest.list_models().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let src = seeded().await;
    let dest = MemoryModelStore::new();

    let aborted = copy_model(
        &DbSource::new(&src.store),
        &DbSink::new(&dest),
        &ModelSelector::by_digest("zz"),
        &opts(),
    )
    .await
    .expect_err("copy must abort");

    assert!(matches!(aborted.error, CopyError::NotFound { kind: "model", .. }));
}
