//! Identity pool
//!
//! Each identity is one authenticated cookie bundle, optionally routed
//! through its own proxy. The pool is the only mutable shared state in the
//! acquisition layer; all access goes through its lock.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use quarry_core::MediaFetcher;

/// Consecutive auth failures before an identity is disabled for the batch.
const AUTH_FAILURE_LIMIT: u32 = 3;

/// One authenticated fetcher identity.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Pool index; doubles as the worker id in stage status.
    pub index: usize,
    pub label: String,
    pub cookie_file: Option<PathBuf>,
    pub proxy: Option<String>,
}

#[derive(Debug)]
struct IdentityState {
    disabled: bool,
    consecutive_auth_failures: u32,
    /// Earliest instant this identity may download again.
    ready_at: Instant,
}

/// Outcome of asking the pool for an identity.
pub enum Checkout {
    /// Use this identity now.
    Ready(Identity),
    /// All enabled identities are pacing; retry after this long.
    Wait(Duration),
    /// Every identity is disabled.
    Exhausted,
}

pub struct IdentityPool {
    identities: Vec<Identity>,
    state: Mutex<Vec<IdentityState>>,
}

impl IdentityPool {
    pub fn new(identities: Vec<Identity>) -> Self {
        let now = Instant::now();
        let state = identities
            .iter()
            .map(|_| IdentityState {
                disabled: false,
                consecutive_auth_failures: 0,
                ready_at: now,
            })
            .collect();
        Self { identities, state: Mutex::new(state) }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Probe every identity with a lightweight authenticated call and
    /// disable the ones that fail. Returns the healthy count.
    pub async fn probe_all(&self, fetcher: &dyn MediaFetcher) -> usize {
        for identity in &self.identities {
            let result = fetcher
                .probe_identity(identity.cookie_file.as_ref(), identity.proxy.as_deref())
                .await;
            if let Err(failure) = result {
                warn!(identity = %identity.label, error = %failure, "identity failed probe, disabling");
                self.state.lock()[identity.index].disabled = true;
            }
        }
        let healthy = self.enabled_count();
        info!(total = self.identities.len(), healthy, "identity pool probed");
        healthy
    }

    pub fn enabled_count(&self) -> usize {
        self.state.lock().iter().filter(|s| !s.disabled).count()
    }

    /// All currently enabled identities, in pool order.
    pub fn enabled_identities(&self) -> Vec<Identity> {
        let state = self.state.lock();
        self.identities
            .iter()
            .filter(|i| !state[i.index].disabled)
            .cloned()
            .collect()
    }

    /// Pick the enabled identity that has waited longest; if all are still
    /// pacing, report how long until the earliest becomes ready.
    pub fn checkout(&self) -> Checkout {
        let state = self.state.lock();
        let now = Instant::now();

        let mut best_ready: Option<usize> = None;
        let mut earliest_wait: Option<Duration> = None;

        for (index, s) in state.iter().enumerate() {
            if s.disabled {
                continue;
            }
            if s.ready_at <= now {
                let better = match best_ready {
                    None => true,
                    Some(b) => s.ready_at < state[b].ready_at,
                };
                if better {
                    best_ready = Some(index);
                }
            } else {
                let wait = s.ready_at - now;
                if earliest_wait.map(|w| wait < w).unwrap_or(true) {
                    earliest_wait = Some(wait);
                }
            }
        }

        match (best_ready, earliest_wait) {
            (Some(index), _) => Checkout::Ready(self.identities[index].clone()),
            (None, Some(wait)) => Checkout::Wait(wait),
            (None, None) => Checkout::Exhausted,
        }
    }

    /// Record a completed download and pace the identity.
    pub fn record_success(&self, index: usize, next_delay: Duration) {
        let mut state = self.state.lock();
        let s = &mut state[index];
        s.consecutive_auth_failures = 0;
        s.ready_at = Instant::now() + next_delay;
    }

    /// Record an auth failure. Returns true when this disabled the identity.
    pub fn record_auth_failure(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        let s = &mut state[index];
        s.consecutive_auth_failures += 1;
        if !s.disabled && s.consecutive_auth_failures >= AUTH_FAILURE_LIMIT {
            s.disabled = true;
            warn!(identity = index, "identity disabled after repeated auth failures");
            return true;
        }
        false
    }

    /// A non-auth success or failure resets the consecutive-auth counter.
    pub fn record_generic_failure(&self, index: usize) {
        self.state.lock()[index].consecutive_auth_failures = 0;
    }

    pub fn is_disabled(&self, index: usize) -> bool {
        self.state.lock()[index].disabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> IdentityPool {
        IdentityPool::new(
            (0..n)
                .map(|i| Identity {
                    index: i,
                    label: format!("identity-{i}"),
                    cookie_file: None,
                    proxy: None,
                })
                .collect(),
        )
    }

    #[test]
    fn checkout_prefers_longest_waiting() {
        let p = pool(3);
        p.record_success(0, Duration::from_secs(600));
        match p.checkout() {
            Checkout::Ready(identity) => assert_ne!(identity.index, 0),
            _ => panic!("expected a ready identity"),
        }
    }

    #[test]
    fn three_consecutive_auth_failures_disable() {
        let p = pool(2);
        assert!(!p.record_auth_failure(1));
        assert!(!p.record_auth_failure(1));
        assert!(p.record_auth_failure(1));
        assert!(p.is_disabled(1));
        assert_eq!(p.enabled_count(), 1);
    }

    #[test]
    fn success_resets_auth_counter() {
        let p = pool(1);
        p.record_auth_failure(0);
        p.record_auth_failure(0);
        p.record_success(0, Duration::from_millis(0));
        assert!(!p.record_auth_failure(0));
        assert!(!p.is_disabled(0));
    }

    #[test]
    fn all_pacing_reports_wait() {
        let p = pool(1);
        p.record_success(0, Duration::from_secs(60));
        match p.checkout() {
            Checkout::Wait(wait) => assert!(wait <= Duration::from_secs(60)),
            _ => panic!("expected a wait"),
        }
    }

    #[test]
    fn all_disabled_reports_exhausted() {
        let p = pool(1);
        for _ in 0..3 {
            p.record_auth_failure(0);
        }
        assert!(matches!(p.checkout(), Checkout::Exhausted));
    }
}
