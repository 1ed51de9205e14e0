use model_store::ModelDef;
use tracing::{info, instrument, warn};

use super::{CopyWarning, EntityOutcome};
use crate::error::Result;
use crate::id_map::SessionIds;
use crate::portable::TaskEntry;
use crate::sink::EntitySink;

/// Copy a task with its body and run history.
///
/// The task itself is always written. Body worksets and history runs that
/// cannot be found at the destination are left out and reported.
#[instrument(skip_all, fields(task = %entry.doc.name))]
pub(crate) async fn copy_task(
    sink: &dyn EntitySink,
    model: &ModelDef,
    entry: &TaskEntry,
    ids: &SessionIds,
    warnings: &mut Vec<CopyWarning>,
) -> Result<EntityOutcome> {
    entry.doc.check_model(model)?;
    let outcome = sink.put_task(model, entry, ids).await?;
    for warning in &outcome.warnings {
        warn!("{warning}");
    }
    info!(
        placement = %outcome.placement,
        history = entry.doc.history.len(),
        unresolved = outcome.warnings.len(),
        "task copied"
    );
    warnings.extend(outcome.warnings);
    Ok(EntityOutcome {
        name: entry.doc.name.clone(),
        placement: outcome.placement,
        dest_id: outcome.id,
    })
}
