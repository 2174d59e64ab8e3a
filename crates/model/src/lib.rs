//! Object model for the BPMS device management server.
//!
//! The model merges the embedded OMA core objects with an extension set.
//! By default the extension set is the embedded BPMS objects; a configured
//! directory replaces it, and `skip_extensions` runs with the baseline only.
//! A configured directory that is missing or holds no definitions is a
//! startup error, since an incomplete model breaks decoding later.

pub mod definition;
pub mod error;
pub mod model;
pub mod provider;

pub use definition::{InstanceType, ObjectDefinition, Operations, ResourceDefinition, ResourceType};
pub use error::{ModelError, ModelResult};
pub use model::{ExtensionSource, ObjectModel};
pub use provider::{ObjectModelProvider, StaticModelProvider};
