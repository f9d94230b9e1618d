//! apploader-lib: fetch-chain orchestration and manifest retention
//!
//! This crate loads a versioned, multi-module application by fetching each
//! module from an ordered chain of sources, verifying it against its
//! manifest digest, and pinning the manifest so a backing cache never evicts
//! artifacts still in use:
//! - `Fetcher`: one source of module bytes and manifests (embedded, cache, network)
//! - `ConcurrencyGate`: the process-wide bound on in-flight fetches
//! - `FetchChain`: tries fetchers in priority order with digest verification
//! - `Manifest` / `LoadPlan`: parsed, validated module lists in load order
//! - `PinRegistry`: which manifest each application holds pinned
//! - `Loader`: ties the above together for one application load

pub mod chain;
pub mod consts;
pub mod fetcher;
pub mod gate;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod util;

pub use chain::{ChainError, FetchChain, FetchedModule};
pub use fetcher::{ByteStore, CacheFetcher, EmbeddedFetcher, FetchError, Fetcher, HttpFetcher, MemoryStore};
pub use gate::{ConcurrencyGate, GateError};
pub use loader::{LoadError, LoadedApplication, Loader, LoaderConfig};
pub use manifest::{LoadPlan, LoadedManifest, Manifest, ManifestError, ManifestRequest, ModuleRef};
pub use registry::{PinRegistry, RegistryError};
pub use util::hash::Sha256Digest;
