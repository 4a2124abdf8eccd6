//! Beatmap and score database for an osu!-compatible client, with the
//! background difficulty calculators that fill it in.

pub mod cancel;
pub mod config;
pub mod database;
pub mod difficulty;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
