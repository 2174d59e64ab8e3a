//! Object model provider used by the device endpoint and the management surface.

use std::sync::Arc;

use bpms_core::ModelsConfig;
use bpms_store::Registration;

use crate::error::ModelResult;
use crate::model::{load_merged, ObjectModel};

/// Supplies the object model used to decode data from a client.
pub trait ObjectModelProvider: Send + Sync {
    /// Model for `registration`, or the server-wide model for `None`.
    fn object_model(&self, registration: Option<&Registration>) -> Arc<ObjectModel>;
}

/// One merged model shared by every client.
#[derive(Debug, Clone)]
pub struct StaticModelProvider {
    model: Arc<ObjectModel>,
}

impl StaticModelProvider {
    pub fn new(model: ObjectModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }

    /// Loads the baseline and the configured extension set.
    pub fn from_config(config: &ModelsConfig) -> ModelResult<Self> {
        load_merged(config).map(Self::new)
    }
}

impl ObjectModelProvider for StaticModelProvider {
    fn object_model(&self, _registration: Option<&Registration>) -> Arc<ObjectModel> {
        Arc::clone(&self.model)
    }
}
