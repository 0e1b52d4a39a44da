//! Helpers for testing caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test, for example by assigning it to a variable
//!    (`let dir = ecache_test::tempdir()`). Dropping it removes the directory.
//!
//!  - Tests talking to a real redis server get its URL through [`redis_url!`], which skips the
//!    test when `ECACHE_TEST_REDIS_URL` is not set.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `ecache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("ecache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the URL of the redis server to run tests against, if one is configured.
pub fn redis_url_from_env() -> Option<String> {
    let url = std::env::var("ECACHE_TEST_REDIS_URL").ok()?;
    if url.is_empty() { None } else { Some(url) }
}

/// Returns the redis URL for testing, or skips the test if there is none.
#[macro_export]
macro_rules! redis_url {
    () => {
        match $crate::redis_url_from_env() {
            Some(url) => url,
            None => {
                println!("Skipping due to missing ECACHE_TEST_REDIS_URL");
                return;
            }
        }
    };
}
