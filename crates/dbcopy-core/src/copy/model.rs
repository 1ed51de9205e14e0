use model_store::ModelDef;
use tracing::info;

use crate::error::Result;
use crate::sink::{EntitySink, Placement};

/// Copy the model definition. Existing models are matched by digest.
pub(crate) async fn copy_model_def(sink: &dyn EntitySink, model: &ModelDef) -> Result<Placement> {
    let placement = sink.write_model(model).await?;
    info!(model = %model.name, digest = %model.digest, %placement, "model");
    Ok(placement)
}
