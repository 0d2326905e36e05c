//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Package used by the adapter when no override is provided.
pub const DEFAULT_PACKAGE: &str = "k4-highcpu-kvm-250M";

/// Image reference used by the adapter when no override is provided.
pub const DEFAULT_IMAGE: &str = "debian-8";
