//! At most one build per cache key
//!
//! The first caller for a key becomes the leader and holds a [`FlightGuard`].
//! Later callers block until the guard is dropped, then try again. A waiter
//! that wakes after a failed build becomes the next leader.

use crate::targets::CacheKey;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::debug;

#[derive(Default)]
struct Flight {
    done: Mutex<bool>,
    finished: Condvar,
}

impl Flight {
    fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self
                .finished
                .wait(done)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.finished.notify_all();
    }
}

/// Registry of in-progress builds
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<CacheKey, Arc<Flight>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader for `key`, waiting out any current leader first
    pub fn acquire(&self, key: &CacheKey) -> FlightGuard<'_> {
        loop {
            let existing = {
                let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
                match inflight.get(key) {
                    Some(flight) => flight.clone(),
                    None => {
                        let flight = Arc::new(Flight::default());
                        inflight.insert(key.clone(), flight.clone());
                        return FlightGuard {
                            owner: self,
                            key: key.clone(),
                            flight,
                        };
                    }
                }
            };

            debug!(%key, "waiting for in-flight build");
            existing.wait();
        }
    }

    /// Number of keys currently being built
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Leadership of one key; releases waiters when dropped
pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    key: CacheKey,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.owner
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
        self.flight.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::BuildConfiguration;
    use kiln_package::Platform;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(name, "r1", Platform::Ios, "T1", BuildConfiguration::Release)
    }

    #[test]
    fn test_leaders_are_exclusive_per_key() {
        let flights = SingleFlight::new();
        let active = AtomicUsize::new(0);
        let max_active = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _guard = flights.acquire(&key("Net"));
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let flights = SingleFlight::new();
        let _net = flights.acquire(&key("Net"));
        let _log = flights.acquire(&key("Log"));
        assert_eq!(flights.in_flight(), 2);
    }
}
