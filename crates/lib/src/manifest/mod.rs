//! Application manifests.
//!
//! A manifest names the modules an application needs, the digest each
//! module's bytes must hash to, where to fetch them, and the order in which
//! they load. Manifests are parsed from JSON and validated on construction,
//! so every `Manifest` value in the crate is already in a valid load order.

mod error;
pub mod resolver;
mod types;

pub use error::ManifestError;
pub use resolver::LoadPlan;
pub use types::*;
