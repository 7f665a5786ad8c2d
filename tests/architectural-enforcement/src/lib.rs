//! Architectural Enforcement Integration Tests
//!
//! This package holds source scans that keep the gateway core honest:
//! - No thread-blocking sleeps in production code
//! - Locks come from `parking_lot` or `tokio::sync`, never `std::sync`
//! - Production code propagates errors instead of panicking on them
//!
//! The scans live in `tests/`; this library only exposes the scanned roots.

/// Source roots checked by the scans, relative to this package
pub const SCANNED_ROOTS: &[&str] = &["../../gateway/core/src"];

/// Files compiled only under `cfg(test)`
pub const TEST_ONLY_FILES: &[&str] = &["test_utils.rs"];
