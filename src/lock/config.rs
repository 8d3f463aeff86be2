// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Configuration for the lock subsystem.

use super::{
    LOCK_MAX_DEPTH_IN_DEADLOCK_CHECK, LOCK_MAX_N_STEPS_IN_DEADLOCK_CHECK, LOCK_PAGE_BITMAP_MARGIN,
    LOCK_RELEASE_KERNEL_INTERVAL,
};

/// Called on a fatal invariant violation. Must not return.
pub type PanicHook = fn(&str) -> !;

fn abort_process(_msg: &str) -> ! {
    std::process::abort()
}

/// Configuration for `LockSys` initialization.
#[derive(Debug, Clone)]
pub struct LockSysConfig {
    /// Requested number of record lock hash cells (rounded up to a prime).
    pub n_cells: usize,
    /// Deadlock search gives up after this many steps.
    pub max_steps: usize,
    /// Deadlock search gives up past this depth.
    pub max_depth: usize,
    /// Locks released between two yields of the kernel mutex.
    pub release_interval: usize,
    /// Extra bits allocated in record lock bitmaps.
    pub bitmap_margin: usize,
    /// Print individual locks in the all-transactions report.
    pub print_lock_monitor: bool,
    /// Emit a debug event for every lock wait begin and end.
    pub print_waits: bool,
    /// Invoked on fatal invariant violations.
    pub panic_hook: PanicHook,
}

impl Default for LockSysConfig {
    fn default() -> Self {
        Self {
            n_cells: 1024,
            max_steps: LOCK_MAX_N_STEPS_IN_DEADLOCK_CHECK,
            max_depth: LOCK_MAX_DEPTH_IN_DEADLOCK_CHECK,
            release_interval: LOCK_RELEASE_KERNEL_INTERVAL,
            bitmap_margin: LOCK_PAGE_BITMAP_MARGIN,
            print_lock_monitor: false,
            print_waits: false,
            panic_hook: abort_process,
        }
    }
}

impl LockSysConfig {
    /// Sets the requested hash cell count.
    pub fn with_n_cells(mut self, n_cells: usize) -> Self {
        self.n_cells = n_cells;
        self
    }

    /// Sets the deadlock search step and depth caps.
    pub fn with_deadlock_limits(mut self, max_steps: usize, max_depth: usize) -> Self {
        self.max_steps = max_steps;
        self.max_depth = max_depth;
        self
    }

    /// Sets how many locks bulk release frees between mutex yields.
    pub fn with_release_interval(mut self, interval: usize) -> Self {
        self.release_interval = interval.max(1);
        self
    }

    pub fn with_bitmap_margin(mut self, margin: usize) -> Self {
        self.bitmap_margin = margin;
        self
    }

    /// Enables printing of individual locks in monitor output.
    pub fn with_lock_monitor(mut self, on: bool) -> Self {
        self.print_lock_monitor = on;
        self
    }

    pub fn with_print_waits(mut self, on: bool) -> Self {
        self.print_waits = on;
        self
    }

    /// Replaces the fatal error handler.
    pub fn with_panic_hook(mut self, hook: PanicHook) -> Self {
        self.panic_hook = hook;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockSysConfig::default();
        assert_eq!(config.n_cells, 1024);
        assert_eq!(config.max_steps, 1_000_000);
        assert_eq!(config.max_depth, 200);
        assert_eq!(config.release_interval, 1000);
        assert_eq!(config.bitmap_margin, 64);
        assert!(!config.print_lock_monitor);
    }

    #[test]
    fn test_builders() {
        fn hook(msg: &str) -> ! {
            panic!("{msg}")
        }
        let config = LockSysConfig::default()
            .with_n_cells(7)
            .with_deadlock_limits(10, 3)
            .with_release_interval(0)
            .with_lock_monitor(true)
            .with_panic_hook(hook);
        assert_eq!(config.n_cells, 7);
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.release_interval, 1);
        assert!(config.print_lock_monitor);
    }
}
