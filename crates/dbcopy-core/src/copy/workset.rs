use model_store::{ModelDef, ParamCell, ParamDef, SetId};
use tracing::{debug, info, instrument, warn};

use super::{CopyWarning, EntityOutcome};
use crate::config::CopyOptions;
use crate::error::{CopyError, Result};
use crate::id_map::SessionIds;
use crate::portable::WorksetEntry;
use crate::progress::Progress;
use crate::sink::{EntitySink, Placement, WorksetSlot};
use crate::source::PortableSource;

/// Copy one read-only workset.
///
/// The destination workset is written while writable and flipped to
/// read-only only after every parameter has been written. An existing
/// workset with the same name has its values cleared first, never merged.
#[instrument(skip_all, fields(workset = %entry.doc.name))]
pub(crate) async fn copy_workset(
    source: &dyn PortableSource,
    sink: &dyn EntitySink,
    model: &ModelDef,
    entry: &WorksetEntry,
    ids: &mut SessionIds,
    opts: &CopyOptions,
    warnings: &mut Vec<CopyWarning>,
) -> Result<EntityOutcome> {
    let doc = &entry.doc;
    doc.check_model(model)?;
    if !doc.is_readonly {
        return Err(CopyError::NotEligible {
            kind: "workset",
            name: doc.name.clone(),
            reason: "workset is not read-only".to_string(),
        });
    }

    let params = read_params(source, model, entry).await?;

    let mut slot = sink.begin_workset(model, entry, ids).await?;
    if slot.base_run_missing {
        let warning = CopyWarning::BaseRunNotFound {
            workset: doc.name.clone(),
            digest: doc.base_run_digest.clone().unwrap_or_default(),
        };
        warn!("{warning}");
        warnings.push(warning);
    }

    let dest = match hydrate(sink, model, entry, &params, &mut slot, opts).await {
        Ok(dest) => dest,
        Err(err) => {
            if let Err(cleanup) = sink.abort_workset(model, &slot).await {
                warn!(error = %cleanup, "failed to clean up partially copied workset");
            }
            return Err(err);
        }
    };

    if let (Some(source_id), Some(dest_id)) = (entry.source_id, dest) {
        ids.sets.put(source_id, dest_id);
    }
    let placement = if slot.created {
        Placement::Created
    } else {
        Placement::Replaced
    };
    info!(params = params.len(), %placement, "workset copied");
    Ok(EntityOutcome {
        name: doc.name.clone(),
        placement,
        dest_id: dest.map(|id| id.0),
    })
}

async fn read_params<'m>(
    source: &dyn PortableSource,
    model: &'m ModelDef,
    entry: &WorksetEntry,
) -> Result<Vec<(&'m ParamDef, Vec<ParamCell>)>> {
    let doc = &entry.doc;
    if doc.params.is_empty() {
        info!(workset = %doc.name, "workset declares no parameters");
    }
    let mut params = Vec::with_capacity(doc.params.len());
    for declared in &doc.params {
        let param = model.param_by_name(&declared.name).ok_or_else(|| {
            CopyError::not_found("parameter", format!("{} in workset {}", declared.name, doc.name))
        })?;
        let cells = source.workset_param(model, entry, param).await?;
        if cells.is_empty() {
            return Err(CopyError::IncompleteData {
                kind: "workset",
                name: doc.name.clone(),
                detail: format!("parameter {} has no values", param.name),
            });
        }
        params.push((param, cells));
    }
    Ok(params)
}

/// Write parameter values, then commit metadata with the read-only flag.
async fn hydrate(
    sink: &dyn EntitySink,
    model: &ModelDef,
    entry: &WorksetEntry,
    params: &[(&ParamDef, Vec<ParamCell>)],
    slot: &mut WorksetSlot,
    opts: &CopyOptions,
) -> Result<Option<SetId>> {
    let mut progress = Progress::new(
        format!("workset {}", entry.doc.name),
        params.len(),
        opts.progress_interval,
    );
    for (param, cells) in params {
        sink.put_workset_param(model, slot, param, cells).await?;
        progress.step(&param.name);
    }
    debug!(params = progress.done(), "workset values written");
    sink.finish_workset(model, slot, &entry.doc).await
}
