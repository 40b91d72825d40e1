//! Process sampling for the activity agent.
//!
//! A [`Sampler`] takes a point-in-time snapshot of the processes reported by a
//! [`ProcessSource`] and turns every process with a visible window title into
//! an [`ActivityRecord`]. Processes without a title are dropped; that is the
//! only filter.

pub mod system;
pub mod types;

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
mod noop;

pub use system::SystemProcessSource;
pub use types::{ActivityRecord, ProcessInfo};

#[cfg(target_os = "windows")]
pub use windows::window_titles;

#[cfg(target_os = "macos")]
pub use macos::window_titles;

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub use noop::window_titles;

use chrono::NaiveDateTime;
use std::time::Duration;

/// Something that can enumerate the processes running on the host.
pub trait ProcessSource: Send {
    /// Enumerate running processes. Processes that vanish mid-enumeration are
    /// simply absent from the result.
    fn processes(&mut self) -> Vec<ProcessInfo>;
}

/// Turns process listings into ordered activity snapshots.
pub struct Sampler {
    source: Box<dyn ProcessSource>,
    window: Duration,
}

impl Sampler {
    /// Create a sampler whose records each cover `window`.
    pub fn new(source: Box<dyn ProcessSource>, window: Duration) -> Self {
        Self { source, window }
    }

    /// Sampler over the host's real process table.
    pub fn system(window: Duration) -> Self {
        Self::new(Box::new(SystemProcessSource::new()), window)
    }

    /// Take one fully materialised snapshot, ordered by process id.
    pub fn sample(&mut self, user_id: u64, now: NaiveDateTime) -> Vec<ActivityRecord> {
        let mut processes = self.source.processes();
        processes.sort_by_key(|p| p.pid);

        processes
            .iter()
            .filter_map(|p| ActivityRecord::from_process(user_id, p, now, self.window))
            .collect()
    }

    /// The activity window each record covers.
    pub fn window(&self) -> Duration {
        self.window
    }
}
