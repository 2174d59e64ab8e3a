//! Security and registration stores for the BPMS device management server.
//!
//! Two backends implement the [`SecurityStore`] and [`RegistrationStore`]
//! capabilities:
//!
//! - **Local**: JSON files under the data directory, one node only
//! - **Shared**: Redis hashes over a single connection, for clusters
//!
//! [`StoreSelector::select`] picks the backend from the optional Redis URL
//! and always returns both stores of the same kind.

pub mod error;
pub mod local;
pub mod registration;
pub mod security;
pub mod selector;
pub mod shared;

pub use error::{StoreError, StoreResult};
pub use local::{FileRegistrationStore, FileSecurityStore};
pub use registration::{ObjectLink, Registration, RegistrationStore, RegistrationUpdate};
pub use security::{Credential, SecurityInfo, SecurityStore};
pub use selector::{BackendKind, BackendSelection, StoreSelector, Stores};
pub use shared::{RedisRegistrationStore, RedisSecurityStore};
