//! Crate-wide constants.

/// The only manifest format version this loader understands.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// Default number of concurrent fetch attempts allowed process-wide.
pub const DEFAULT_GATE_CAPACITY: usize = 8;

/// Environment variable overriding [`crate::loader::LoaderConfig::gate_capacity`].
pub const ENV_GATE_CAPACITY: &str = "APPLOADER_GATE_CAPACITY";

/// Environment variable overriding [`crate::loader::LoaderConfig::module_parallelism`].
pub const ENV_MODULE_PARALLELISM: &str = "APPLOADER_MODULE_PARALLELISM";

/// Environment variable overriding [`crate::loader::LoaderConfig::require_manifest_digest`].
pub const ENV_REQUIRE_MANIFEST_DIGEST: &str = "APPLOADER_REQUIRE_MANIFEST_DIGEST";

/// Length of a SHA-256 digest in bytes.
pub const SHA256_LEN: usize = 32;
