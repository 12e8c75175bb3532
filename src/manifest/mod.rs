//! Manifest: the per-project source of truth.
//!
//! [`model`] holds the serde entities, [`store`] the lock-protected atomic
//! load/save paths, [`migration`] the schema migration registry.

mod migration;
mod model;
mod store;

pub use migration::{MigrationRegistry, CURRENT_SCHEMA_VERSION};
pub use model::*;
pub use store::ManifestStore;
pub(crate) use store::write_atomic;
