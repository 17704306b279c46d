//! Test support: a deterministic clock and an in-memory matching backend that honours the
//! backend contracts (exclusivity, stale invites, feed emission), so the engine can be exercised
//! end to end without a server.
mod manual_clock;
mod memory_backend;

pub use manual_clock::ManualClock;
pub use memory_backend::InMemoryBackend;

/// Load `.env.test` and wire up logging for tests.
pub fn init_test_env() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
}
