use model_store::{ModelDef, ParamCell, ParamDef, RunId};
use tracing::{debug, info, instrument, warn};

use super::EntityOutcome;
use crate::config::CopyOptions;
use crate::error::{CopyError, Result};
use crate::id_map::SessionIds;
use crate::portable::RunEntry;
use crate::progress::Progress;
use crate::sink::{EntitySink, Placement, RunSlot};
use crate::source::PortableSource;

/// Copy one completed run with all of its values.
///
/// Every model parameter must have values in the source before anything
/// is written. If writing fails after the destination run was created,
/// that run is deleted again and the original error is returned.
#[instrument(skip_all, fields(run = %entry.doc.label()))]
pub(crate) async fn copy_run(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    model: &ModelDef,
    entry: &RunEntry,
    ids: &mut SessionIds,
    opts: &CopyOptions,
) -> Result<EntityOutcome> {
    let doc = &entry.doc;
    doc.check_model(model)?;
    if !doc.status.is_completed() {
        return Err(CopyError::NotEligible {
            kind: "run",
            name: doc.label(),
            reason: format!("status is {}", doc.status),
        });
    }

    if let Some(existing) = sink.find_run(model, doc).await? {
        if let Some(source_id) = entry.source_id {
            ids.runs.put(source_id, existing);
        }
        info!(dest_id = %existing, "run already exists");
        return Ok(EntityOutcome {
            name: doc.name.clone(),
            placement: Placement::AlreadyExists,
            dest_id: Some(existing.0),
        });
    }

    let params = read_params(source, model, entry).await?;

    let mut slot = sink.begin_run(model, doc).await?;
    let dest = match hydrate(source, sink, model, entry, &params, &mut slot, opts).await {
        Ok(dest) => dest,
        Err(err) => {
            if let Err(cleanup) = sink.abort_run(model, &slot).await {
                warn!(error = %cleanup, "failed to remove partially copied run");
            }
            return Err(err);
        }
    };

    if let (Some(source_id), Some(dest_id)) = (entry.source_id, dest) {
        ids.runs.put(source_id, dest_id);
    }
    info!(params = params.len(), "run copied");
    Ok(EntityOutcome {
        name: doc.name.clone(),
        placement: Placement::Created,
        dest_id: dest.map(|id| id.0),
    })
}

async fn read_params<'m>(
    source: &dyn PortableSource,
    model: &'m ModelDef,
    entry: &RunEntry,
) -> Result<Vec<(&'m ParamDef, Vec<ParamCell>)>> {
    let mut params = Vec::with_capacity(model.params.len());
    for param in &model.params {
        let cells = source.run_param(model, entry, param).await?;
        if cells.is_empty() {
            return Err(CopyError::IncompleteData {
                kind: "run",
                name: entry.doc.label(),
                detail: format!("parameter {} has no values", param.name),
            });
        }
        params.push((param, cells));
    }
    Ok(params)
}

/// Write value tables, then commit the run metadata.
async fn hydrate(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    model: &ModelDef,
    entry: &RunEntry,
    params: &[(&ParamDef, Vec<ParamCell>)],
    slot: &mut RunSlot,
    opts: &CopyOptions,
) -> Result<Option<RunId>> {
    let codec = &opts.codec;
    let entities = if codec.no_microdata {
        0
    } else {
        model.entities.len()
    };
    let total = params.len() + model.tables.len() + entities;
    let mut progress = Progress::new(
        format!("run {}", entry.doc.name),
        total,
        opts.progress_interval,
    );

    for (param, cells) in params {
        sink.put_run_param(model, slot, param, cells).await?;
        progress.step(&param.name);
    }

    for table in &model.tables {
        let mut values = source.run_table(model, entry, table).await?;
        if codec.no_accumulators {
            values.accs.clear();
        }
        sink.put_run_table(model, slot, table, &values).await?;
        progress.step(&table.name);
    }

    if !codec.no_microdata {
        for entity in &model.entities {
            let cells = source.run_microdata(model, entry, entity).await?;
            if !cells.is_empty() {
                sink.put_run_microdata(model, slot, entity, &cells).await?;
            }
            progress.step(&entity.name);
        }
    }
    debug!(items = progress.done(), "run values written");
    sink.finish_run(model, slot, &entry.doc).await
}
