use super::*;

use rand::Rng;
use std::time::Instant;

struct Inner {
    last_contact: Instant,
    /// Rolled anew in `[T, 2T]` on every leader contact so followers
    /// don't promote in lockstep.
    timeout: Duration,
}

pub struct FailureDetector {
    base: Duration,
    inner: spin::RwLock<Inner>,
}

impl FailureDetector {
    pub fn new(election_timeout: Duration) -> Self {
        let inner = Inner {
            last_contact: Instant::now(),
            timeout: election_timeout * 2,
        };
        Self {
            base: election_timeout,
            inner: spin::RwLock::new(inner),
        }
    }

    fn roll_timeout(base: Duration) -> Duration {
        let t = base.as_millis() as u64;
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(t..=2 * t))
    }

    pub fn receive_heartbeat(&self) {
        let mut inner = self.inner.write();
        inner.last_contact = Instant::now();
        inner.timeout = Self::roll_timeout(self.base);
    }

    /// A short extra stagger to wait before promoting, or None while the
    /// leader is still considered alive.
    pub fn get_election_timeout(&self) -> Option<Duration> {
        let inner = self.inner.read();
        let elapsed = Instant::now() - inner.last_contact;
        if elapsed < inner.timeout {
            return None;
        }
        let t = self.base.as_millis() as u64;
        let mut rng = rand::thread_rng();
        Some(Duration::from_millis(rng.gen_range(0..=t / 2)))
    }
}
