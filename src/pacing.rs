//! Request pacing and run deadlines.
//!
//! Executors issue calls strictly one after another and pause after every
//! call. The pause goes through `Pacer` so tests can observe it without
//! sleeping.

use std::thread;
use std::time::{Duration, Instant};

/// Blocks between consecutive remote calls.
pub trait Pacer {
    /// Pause for `delay`.
    fn pause(&self, delay: Duration);
}

/// Production pacer backed by `std::thread::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleepPacer;

impl Pacer for ThreadSleepPacer {
    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl<P: Pacer + ?Sized> Pacer for &P {
    fn pause(&self, delay: Duration) {
        (**self).pause(delay)
    }
}

/// Optional wall-clock bound on a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Expire at `at`.
    pub fn at(at: Instant) -> Self {
        Self { at: Some(at) }
    }

    /// Expire `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
        }
    }

    /// `true` once the deadline has passed.
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}
