//! Fixture catalog for the backend parity harness.
//!
//! A fixture is one test case (handler, runtime, input event, timeout) that is
//! executed on both compute backends. Fixtures are loaded once and shared
//! read-only by every concurrent runner.

mod catalog;
mod fixture;

pub use catalog::{load_catalog, CatalogOptions, LoadError, FIXTURE_FILE_NAME};
pub use fixture::{
    clamp_timeout_seconds, derive_fixture_name, FixtureFile, Runtime, TestFixture,
    DEFAULT_SUITE_PREFIX, DEFAULT_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
};
