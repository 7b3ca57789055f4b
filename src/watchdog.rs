//! This module contains the type definitions necessary to support cancellation
//! of an exploration run.
//!
//! # Best-Effort Monitoring
//!
//! The explorer is single-threaded and synchronous, so a watchdog cannot
//! interrupt it. Instead the explorer polls its watchdog every
//! [`Watchdog::poll_every`] interpreted instructions, and unwinds with a
//! timeout when asked to stop. Whatever was found before that point is still
//! reported.

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Rc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the explorer needs
/// to abort processing.
pub trait Watchdog
where
    Self: Debug,
{
    /// Checks if the explorer should halt its analysis.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of instructions the explorer should interpret before
    /// polling the watchdog.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A watchdog that never fires. Runs guarded by it end only when the
/// explorer runs out of paths or hits one of its configured limits.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Never fires, so polling it is wasted work.
        1_000_000_000_000
    }
}

/// A watchdog that fires once a shared [`AtomicBool`] is raised, letting
/// another thread cancel an analysis in flight.
///
/// It is polled every [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] interpreted
/// instructions unless [`Self::polling_every`] says otherwise.
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// Raised by the owner of the other end to cancel the run.
    flag: Arc<AtomicBool>,

    /// The number of instructions between polls.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Creates a watchdog that fires when `flag` becomes `true`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Sets how many instructions the explorer interprets between checks of
    /// the flag.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps `self` into an [`Rc`] for handing to the detector.
    #[must_use]
    pub fn in_rc(self) -> DynWatchdog {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A watchdog that fires once a wall-clock deadline has passed.
///
/// This is how the global timeout for a run is enforced.
#[derive(Clone, Debug)]
pub struct DeadlineWatchdog {
    /// The point in time after which the explorer should stop.
    deadline: Instant,

    /// The number of instructions between polls.
    poll_loop_iterations: usize,
}

impl DeadlineWatchdog {
    /// Constructs a watchdog that fires `budget` after the moment of its
    /// creation.
    #[must_use]
    pub fn starting_now(budget: Duration) -> Self {
        // An overflowing budget means there is effectively no deadline.
        let now = Instant::now();
        let deadline = now
            .checked_add(budget)
            .unwrap_or(now + Duration::from_secs(u32::MAX.into()));
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            deadline,
            poll_loop_iterations,
        }
    }
}

impl Watchdog for DeadlineWatchdog {
    fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::watchdog::{DeadlineWatchdog, FlagWatchdog, LazyWatchdog, Watchdog};

    #[test]
    fn lazy_watchdog_never_stops() {
        assert!(!LazyWatchdog.should_stop());
    }

    #[test]
    fn flag_watchdog_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let watchdog = FlagWatchdog::new(flag.clone()).polling_every(7);
        assert!(!watchdog.should_stop());
        assert_eq!(watchdog.poll_every(), 7);

        flag.store(true, Ordering::Relaxed);
        assert!(watchdog.should_stop());
    }

    #[test]
    fn deadline_watchdog_fires_after_its_budget() {
        let expired = DeadlineWatchdog::starting_now(Duration::ZERO);
        assert!(expired.should_stop());

        let distant = DeadlineWatchdog::starting_now(Duration::from_secs(3600));
        assert!(!distant.should_stop());
    }

    #[test]
    fn overflowing_budget_means_no_deadline() {
        let unbounded = DeadlineWatchdog::starting_now(Duration::MAX);
        assert!(!unbounded.should_stop());
        assert!(!LazyWatchdog.in_rc().should_stop());
    }
}
