//! Image provisioning
//!
//! Makes sure an image exists locally before anything is started from it and
//! resolves it to its immutable id.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::ImageRef;
use crate::infra::{ContainerEngine, EngineError};

use super::error::{WorkloadError, WorkloadResult};

pub struct ImageProvisioner {
    engine: Arc<dyn ContainerEngine>,
}

impl ImageProvisioner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Returns the image id of `image`, pulling it first when it is not present.
    ///
    /// An image that is already present costs exactly one inspect call.
    pub async fn ensure(&self, image: &ImageRef) -> WorkloadResult<String> {
        let reference = image.reference();

        match self.engine.inspect_image(&reference).await {
            Ok(id) => return Ok(id),
            Err(EngineError::NotFound(_)) => {
                info!(image = %reference, "Image not found locally, pulling");
            }
            Err(e) => {
                warn!(image = %reference, error = %e, "Image inspect failed");
                return Err(provision_error(&reference, e));
            }
        }

        self.engine
            .pull_image(&reference)
            .await
            .map_err(|e| provision_error(&reference, e))?;

        let id = self
            .engine
            .inspect_image(&reference)
            .await
            .map_err(|e| provision_error(&reference, e))?;

        info!(image = %reference, image_id = %id, "Image ready");
        Ok(id)
    }
}

fn provision_error(reference: &str, err: EngineError) -> WorkloadError {
    WorkloadError::ImageProvision {
        reference: reference.to_string(),
        reason: err.to_string(),
    }
}
