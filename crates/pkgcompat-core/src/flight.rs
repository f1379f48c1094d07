//! Single-flight: at most one in-flight execution per fingerprint.

use pkgcompat_schema::Fingerprint;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

enum CallState<T> {
    Pending,
    Done(T),
    /// The leader went away without a result.
    Abandoned,
}

/// Shared slot that every caller of one fingerprint waits on.
pub struct Call<T> {
    state: Mutex<CallState<T>>,
    done: Condvar,
}

/// What the calling thread should wait for.
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut,
    Abandoned,
}

impl<T: Clone> Call<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CallState::Pending),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallState<T>> {
        // The state is a plain enum; a panic elsewhere cannot leave it half-updated.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn settle(&self, next: CallState<T>) {
        let mut state = self.lock();
        if matches!(*state, CallState::Pending) {
            *state = next;
        }
        drop(state);
        self.done.notify_all();
    }

    pub fn wait(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            match &*state {
                CallState::Done(v) => return Some(v.clone()),
                CallState::Abandoned => return None,
                CallState::Pending => {
                    state = self
                        .done
                        .wait(state)
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                }
            }
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            match &*state {
                CallState::Done(v) => return WaitOutcome::Ready(v.clone()),
                CallState::Abandoned => return WaitOutcome::Abandoned,
                CallState::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    state = self
                        .done
                        .wait_timeout(state, deadline - now)
                        .map(|(s, _)| s)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
            }
        }
    }
}

/// Result of joining a flight.
pub enum Join<T> {
    /// The caller must perform the work and [`complete`](SingleFlight::complete) it.
    Leader(Arc<Call<T>>),
    /// Someone else is already doing the work.
    Follower(Arc<Call<T>>),
}

impl<T> Join<T> {
    pub fn call(&self) -> &Arc<Call<T>> {
        match self {
            Join::Leader(c) | Join::Follower(c) => c,
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Join::Leader(_))
    }
}

pub struct SingleFlight<T> {
    calls: Mutex<HashMap<Fingerprint, Arc<Call<T>>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, HashMap<Fingerprint, Arc<Call<T>>>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Join the flight for `key`, becoming its leader if none is in progress.
    pub fn join(&self, key: &Fingerprint) -> Join<T> {
        let mut calls = self.calls();
        if let Some(call) = calls.get(key) {
            return Join::Follower(Arc::clone(call));
        }
        let call = Arc::new(Call::new());
        calls.insert(key.clone(), Arc::clone(&call));
        Join::Leader(call)
    }

    /// Publish the result for `key` and wake every waiter. Later joins start a new flight.
    pub fn complete(&self, key: &Fingerprint, value: T) {
        if let Some(call) = self.calls().remove(key) {
            call.settle(CallState::Done(value));
        }
    }

    /// Drop the flight for `key` without a result; waiters see `Abandoned`.
    pub fn abandon(&self, key: &Fingerprint) {
        if let Some(call) = self.calls().remove(key) {
            call.settle(CallState::Abandoned);
        }
    }

    /// Run `work` as leader, or wait for the leader already running it.
    ///
    /// Returns `None` only if the leader panicked.
    pub fn run(&self, key: &Fingerprint, work: impl FnOnce() -> T) -> Option<T> {
        match self.join(key) {
            Join::Follower(call) => call.wait(),
            Join::Leader(_) => {
                let guard = AbandonOnDrop {
                    flight: self,
                    key: Some(key),
                };
                let value = work();
                guard.disarm();
                self.complete(key, value.clone());
                Some(value)
            }
        }
    }
}

struct AbandonOnDrop<'a, T: Clone> {
    flight: &'a SingleFlight<T>,
    key: Option<&'a Fingerprint>,
}

impl<T: Clone> AbandonOnDrop<'_, T> {
    fn disarm(mut self) {
        self.key = None;
    }
}

impl<T: Clone> Drop for AbandonOnDrop<'_, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.flight.abandon(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn key(s: &str) -> Fingerprint {
        Fingerprint::new(s)
    }

    #[test]
    fn concurrent_runs_execute_once() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let runs = Arc::clone(&runs);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    flight.run(&key("k"), || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(250));
                        42
                    })
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| *r == Some(42)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // Nothing left registered: the next caller leads a new flight.
        assert!(flight.join(&key("k")).is_leader());
    }

    #[test]
    fn distinct_keys_do_not_share() {
        let flight = SingleFlight::<u32>::new();
        assert!(flight.join(&key("a")).is_leader());
        assert!(flight.join(&key("b")).is_leader());
        assert!(!flight.join(&key("a")).is_leader());
    }

    #[test]
    fn completed_flight_is_forgotten() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run(&key("k"), || 1), Some(1));
        assert_eq!(flight.run(&key("k"), || 2), Some(2));
    }

    #[test]
    fn timed_out_waiter_leaves_flight_running() {
        let flight = SingleFlight::<&'static str>::new();
        let leader = flight.join(&key("k"));
        assert!(matches!(
            leader.call().wait_timeout(Duration::from_millis(10)),
            WaitOutcome::TimedOut
        ));

        let late = flight.join(&key("k"));
        assert!(!late.is_leader());
        flight.complete(&key("k"), "done");
        assert!(matches!(
            late.call().wait_timeout(Duration::from_secs(1)),
            WaitOutcome::Ready("done")
        ));
    }

    #[test]
    fn panicking_leader_abandons_followers() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let started = Arc::new(Barrier::new(2));

        let leader = {
            let flight = Arc::clone(&flight);
            let started = Arc::clone(&started);
            thread::spawn(move || {
                flight.run(&key("k"), || {
                    started.wait();
                    thread::sleep(Duration::from_millis(50));
                    panic!("leader failed");
                })
            })
        };
        started.wait();
        let follower = flight.join(&key("k"));
        assert!(!follower.is_leader());
        assert!(leader.join().is_err());
        assert!(matches!(
            follower.call().wait_timeout(Duration::from_secs(1)),
            WaitOutcome::Abandoned
        ));
        assert!(flight.join(&key("k")).is_leader());
    }
}
