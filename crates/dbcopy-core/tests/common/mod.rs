//! Shared fixtures: model "M1" (digest "d1") with two parameters, one
//! output table and one microdata entity, seeded into a memory store.
#![allow(dead_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use model_store::fakes::MemoryModelStore;
use model_store::{
    AccCell, AccDef, AttrDef, CellValue, DescrNote, DimDef, EntityDef, EnumItem, ExprCell,
    ExprDef, MicroCell, ModelDef, ModelId, ModelStore, ParamCell, ParamDef, RunId, RunMeta,
    RunStatus, SetId, TableDef, TableValues, TaskId, TaskMeta, TaskRunItem, TaskRunMeta, TypeDef,
    TypeKind, WorksetMeta, WorksetParam,
};

pub const P1: i32 = 1;
pub const P2: i32 = 2;
pub const T1: i32 = 10;
pub const PERSON: i32 = 20;

pub fn fixed_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .expect("parse timestamp")
        .with_timezone(&Utc)
}

pub fn model_def() -> ModelDef {
    let sex = DimDef {
        name: "sex".to_string(),
        type_name: "SEX".to_string(),
        size: 2,
    };
    ModelDef {
        name: "M1".to_string(),
        digest: "d1".to_string(),
        version: "1.0.0".to_string(),
        types: vec![TypeDef {
            name: "SEX".to_string(),
            kind: TypeKind::Enum {
                items: vec![
                    EnumItem {
                        id: 0,
                        name: "F".to_string(),
                    },
                    EnumItem {
                        id: 1,
                        name: "M".to_string(),
                    },
                ],
            },
        }],
        params: vec![
            ParamDef {
                hid: P1,
                name: "ageSex".to_string(),
                digest: "p1".to_string(),
                type_name: "double".to_string(),
                dims: vec![sex.clone()],
            },
            ParamDef {
                hid: P2,
                name: "startAge".to_string(),
                digest: "p2".to_string(),
                type_name: "int".to_string(),
                dims: vec![],
            },
        ],
        tables: vec![TableDef {
            hid: T1,
            name: "salaryBySex".to_string(),
            digest: "t1".to_string(),
            dims: vec![sex],
            accs: vec![AccDef {
                acc_id: 0,
                name: "acc0".to_string(),
            }],
            exprs: vec![ExprDef {
                expr_id: 0,
                name: "expr0".to_string(),
            }],
        }],
        entities: vec![EntityDef {
            hid: PERSON,
            name: "Person".to_string(),
            digest: "e1".to_string(),
            attrs: vec![
                AttrDef {
                    attr_id: 0,
                    name: "age".to_string(),
                    type_name: "int".to_string(),
                },
                AttrDef {
                    attr_id: 1,
                    name: "income".to_string(),
                    type_name: "double".to_string(),
                },
            ],
        }],
    }
}

pub fn p1_cells(scale: f64) -> Vec<ParamCell> {
    vec![
        ParamCell {
            sub_id: 0,
            dims: vec![0],
            value: CellValue::Float(0.1 * scale),
        },
        ParamCell {
            sub_id: 0,
            dims: vec![1],
            value: CellValue::Null,
        },
    ]
}

pub fn p2_cells(start: i64) -> Vec<ParamCell> {
    vec![ParamCell {
        sub_id: 0,
        dims: vec![],
        value: CellValue::Int(start),
    }]
}

pub fn table_values() -> TableValues {
    TableValues {
        exprs: vec![
            ExprCell {
                expr_id: 0,
                dims: vec![0],
                value: Some(1234.5),
            },
            ExprCell {
                expr_id: 0,
                dims: vec![1],
                value: None,
            },
        ],
        accs: vec![AccCell {
            acc_id: 0,
            sub_id: 0,
            dims: vec![1],
            value: Some(2.25),
        }],
    }
}

pub fn micro_cells() -> Vec<MicroCell> {
    vec![
        MicroCell {
            key: 101,
            attrs: vec![CellValue::Int(42), CellValue::Float(51000.5)],
        },
        MicroCell {
            key: 102,
            attrs: vec![CellValue::Int(17), CellValue::Null],
        },
    ]
}

pub fn run_meta(name: &str, digest: Option<&str>, status: RunStatus) -> RunMeta {
    RunMeta {
        name: name.to_string(),
        sub_count: 1,
        status,
        create_date: fixed_time(),
        update_date: fixed_time(),
        digest: digest.map(str::to_string),
        value_digest: digest.map(|d| format!("{d}-values")),
        run_stamp: format!("stamp-{name}"),
        options: BTreeMap::from([("Parameter.startAge".to_string(), "20".to_string())]),
        txt: vec![DescrNote {
            lang: "EN".to_string(),
            descr: format!("run {name}"),
            note: None,
        }],
    }
}

pub fn workset_meta(name: &str, readonly: bool, base: Option<RunId>, hids: &[i32]) -> WorksetMeta {
    WorksetMeta {
        name: name.to_string(),
        is_readonly: readonly,
        base_run_id: base,
        update_date: fixed_time(),
        params: hids
            .iter()
            .map(|&hid| WorksetParam {
                hid,
                sub_count: 1,
                default_sub_id: 0,
            })
            .collect(),
        txt: vec![],
    }
}

/// Source store seeded with M1, a completed run R1 (digest "rA") with every
/// value set, and a read-only workset W1 based on R1.
pub struct Seeded {
    pub store: MemoryModelStore,
    pub model_id: ModelId,
    pub run_id: RunId,
    pub set_id: SetId,
}

pub async fn seed_model(store: &MemoryModelStore) -> ModelId {
    store.insert_model(&model_def()).await.expect("insert model")
}

/// Insert a run; `full` writes every parameter, otherwise only P1.
pub async fn seed_run(
    store: &MemoryModelStore,
    model_id: ModelId,
    name: &str,
    digest: Option<&str>,
    status: RunStatus,
    full: bool,
) -> RunId {
    let run_id = store
        .insert_run(model_id, &run_meta(name, digest, status))
        .await
        .expect("insert run");
    store
        .write_run_param(run_id, P1, &p1_cells(1.0))
        .await
        .expect("write P1");
    if full {
        store
            .write_run_param(run_id, P2, &p2_cells(20))
            .await
            .expect("write P2");
    }
    store
        .write_run_table(run_id, T1, &table_values())
        .await
        .expect("write table");
    store
        .write_run_microdata(run_id, PERSON, &micro_cells())
        .await
        .expect("write microdata");
    run_id
}

/// Insert a workset, write its values, then mark it read-only if asked.
pub async fn seed_workset(
    store: &MemoryModelStore,
    model_id: ModelId,
    name: &str,
    base: Option<RunId>,
    readonly: bool,
) -> SetId {
    let set_id = store
        .insert_workset(model_id, &workset_meta(name, false, base, &[P1, P2]))
        .await
        .expect("insert workset");
    store
        .write_workset_param(set_id, P1, &p1_cells(2.0))
        .await
        .expect("write P1");
    store
        .write_workset_param(set_id, P2, &p2_cells(30))
        .await
        .expect("write P2");
    if readonly {
        store
            .update_workset(set_id, &workset_meta(name, true, base, &[P1, P2]))
            .await
            .expect("mark read-only");
    }
    set_id
}

/// Task T1: body [set], history with the same task run recorded twice.
pub async fn seed_task(
    store: &MemoryModelStore,
    model_id: ModelId,
    set_id: SetId,
    runs: &[RunId],
) -> TaskId {
    let task_id = store
        .insert_task(
            model_id,
            &TaskMeta {
                name: "T1".to_string(),
                txt: vec![],
                set_ids: vec![set_id],
            },
        )
        .await
        .expect("insert task");
    let meta = TaskRunMeta {
        name: "taskRun1".to_string(),
        sub_count: 1,
        status: RunStatus::Success,
        create_date: fixed_time(),
        update_date: fixed_time(),
        run_stamp: "2024_03_01".to_string(),
        items: runs
            .iter()
            .map(|&run_id| TaskRunItem { run_id, set_id })
            .collect(),
    };
    for _ in 0..2 {
        store
            .insert_task_run(task_id, &meta)
            .await
            .expect("insert task run");
    }
    task_id
}

pub async fn seeded() -> Seeded {
    let store = MemoryModelStore::with_id_offset(1000);
    let model_id = seed_model(&store).await;
    let run_id = seed_run(&store, model_id, "R1", Some("rA"), RunStatus::Success, true).await;
    let set_id = seed_workset(&store, model_id, "W1", Some(run_id), true).await;
    Seeded {
        store,
        model_id,
        run_id,
        set_id,
    }
}
