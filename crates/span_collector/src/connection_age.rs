//! Maximum connection age for receivers feeding the queue.
//!
//! A connection that reaches its (jittered) maximum age is asked to go away
//! gracefully; if it is still open after the grace period it is closed.
//! Jitter spreads reconnects out so clients do not all reconnect at once.

use pipeline_config::CollectorOptions;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default jitter applied to each connection's maximum age (±10%).
pub const DEFAULT_AGE_JITTER: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionAgePolicy {
    /// Zero disables ageing
    pub max_age: Duration,
    pub grace: Duration,
    /// Fraction of `max_age` by which a connection's age may vary either way,
    /// clamped to `[0, 1]`
    pub jitter: f64,
}

impl ConnectionAgePolicy {
    pub fn new(max_age: Duration, grace: Duration) -> Self {
        Self {
            max_age,
            grace,
            jitter: DEFAULT_AGE_JITTER,
        }
    }

    pub fn from_options(options: &CollectorOptions) -> Self {
        Self::new(options.max_connection_age, options.max_connection_age_grace)
    }

    pub fn is_enabled(&self) -> bool {
        !self.max_age.is_zero()
    }
}

impl Default for ConnectionAgePolicy {
    fn default() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

pub type ConnectionId = u64;

/// What a receiver must do with a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Ask the client to finish in-flight requests and reconnect
    GoAway(ConnectionId),
    /// Grace elapsed; close the connection now
    Close(ConnectionId),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Active { go_away_at: Instant },
    /// `None` when the grace period runs past what `Instant` can represent
    Draining { close_at: Option<Instant> },
}

/// Tracks open connections against a [`ConnectionAgePolicy`].
pub struct ConnectionTracker {
    policy: ConnectionAgePolicy,
    connections: HashMap<ConnectionId, Phase>,
    rng: StdRng,
}

impl ConnectionTracker {
    pub fn new(policy: ConnectionAgePolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(policy: ConnectionAgePolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: ConnectionAgePolicy, rng: StdRng) -> Self {
        Self {
            policy,
            connections: HashMap::new(),
            rng,
        }
    }

    pub fn policy(&self) -> &ConnectionAgePolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Starts tracking a connection accepted at `now`.
    ///
    /// Does nothing when ageing is disabled. A connection whose deadline
    /// cannot be represented never ages out and is not tracked.
    pub fn register(&mut self, id: ConnectionId, now: Instant) {
        if !self.policy.is_enabled() {
            return;
        }
        let jitter = if self.policy.jitter.is_nan() {
            0.0
        } else {
            self.policy.jitter.clamp(0.0, 1.0)
        };
        let factor = 1.0 + self.rng.gen_range(-jitter..=jitter);
        let go_away_at = Duration::try_from_secs_f64(self.policy.max_age.as_secs_f64() * factor)
            .ok()
            .and_then(|age| now.checked_add(age));
        match go_away_at {
            Some(go_away_at) => {
                self.connections.insert(id, Phase::Active { go_away_at });
            }
            None => debug!(
                connection = id,
                max_age = ?self.policy.max_age,
                "connection age out of range, not ageing"
            ),
        }
    }

    /// Stops tracking a connection the client closed on its own.
    pub fn remove(&mut self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Advances every connection to `now` and returns the actions due.
    ///
    /// A connection past its go-away point and its grace in the same sweep
    /// gets both actions, in order.
    pub fn sweep(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let grace = self.policy.grace;
        let mut actions = Vec::new();
        let mut closed = Vec::new();

        for (&id, phase) in &mut self.connections {
            if let Phase::Active { go_away_at } = *phase {
                if now < go_away_at {
                    continue;
                }
                actions.push(ConnectionAction::GoAway(id));
                *phase = Phase::Draining {
                    close_at: go_away_at.checked_add(grace),
                };
            }
            if let Phase::Draining { close_at: Some(close_at) } = *phase {
                if now >= close_at {
                    actions.push(ConnectionAction::Close(id));
                    closed.push(id);
                }
            }
        }

        for id in closed {
            self.connections.remove(&id);
        }
        if !actions.is_empty() {
            debug!(actions = actions.len(), open = self.connections.len(), "connection age sweep");
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(max_age: u64, grace: u64) -> ConnectionAgePolicy {
        ConnectionAgePolicy {
            max_age: Duration::from_secs(max_age),
            grace: Duration::from_secs(grace),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_disabled_policy_tracks_nothing() {
        let mut tracker = ConnectionTracker::new(ConnectionAgePolicy::default());
        let now = Instant::now();
        tracker.register(1, now);
        assert!(tracker.is_empty());
        assert!(tracker.sweep(now + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn test_go_away_then_close_after_grace() {
        let mut tracker = ConnectionTracker::with_seed(exact(60, 10), 7);
        let start = Instant::now();
        tracker.register(1, start);

        assert!(tracker.sweep(start + Duration::from_secs(59)).is_empty());
        assert_eq!(
            tracker.sweep(start + Duration::from_secs(60)),
            vec![ConnectionAction::GoAway(1)]
        );
        assert!(tracker.sweep(start + Duration::from_secs(65)).is_empty());
        assert_eq!(
            tracker.sweep(start + Duration::from_secs(70)),
            vec![ConnectionAction::Close(1)]
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_late_sweep_emits_both_actions() {
        let mut tracker = ConnectionTracker::with_seed(exact(60, 10), 7);
        let start = Instant::now();
        tracker.register(3, start);
        assert_eq!(
            tracker.sweep(start + Duration::from_secs(500)),
            vec![ConnectionAction::GoAway(3), ConnectionAction::Close(3)]
        );
    }

    #[test]
    fn test_removed_connection_is_forgotten() {
        let mut tracker = ConnectionTracker::with_seed(exact(1, 1), 7);
        let start = Instant::now();
        tracker.register(1, start);
        tracker.remove(1);
        assert!(tracker.sweep(start + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_huge_max_age_never_ages_out() {
        let policy = ConnectionAgePolicy::new(Duration::from_secs(u64::MAX / 2), Duration::ZERO);
        let mut tracker = ConnectionTracker::with_seed(policy, 1);
        let start = Instant::now();
        tracker.register(1, start);
        assert!(tracker.is_empty());
        assert!(tracker.sweep(start + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn test_huge_grace_goes_away_but_never_closes() {
        let mut tracker = ConnectionTracker::with_seed(
            ConnectionAgePolicy {
                max_age: Duration::from_secs(1),
                grace: Duration::MAX,
                jitter: 0.0,
            },
            1,
        );
        let start = Instant::now();
        tracker.register(1, start);
        assert_eq!(
            tracker.sweep(start + Duration::from_secs(2)),
            vec![ConnectionAction::GoAway(1)]
        );
        assert!(tracker.sweep(start + Duration::from_secs(3600)).is_empty());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_out_of_range_jitter_is_clamped() {
        for jitter in [5.0, -3.0, f64::NAN] {
            let mut tracker = ConnectionTracker::with_seed(
                ConnectionAgePolicy {
                    max_age: Duration::from_secs(100),
                    grace: Duration::ZERO,
                    jitter,
                },
                9,
            );
            let start = Instant::now();
            for id in 0..50 {
                tracker.register(id, start);
            }
            assert_eq!(tracker.len(), 50);
            let closes = tracker
                .sweep(start + Duration::from_secs(201))
                .iter()
                .filter(|a| matches!(a, ConnectionAction::Close(_)))
                .count();
            assert_eq!(closes, 50);
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ConnectionAgePolicy::new(Duration::from_secs(100), Duration::ZERO);
        let mut tracker = ConnectionTracker::with_seed(policy, 42);
        let start = Instant::now();
        for id in 0..200 {
            tracker.register(id, start);
        }
        assert!(tracker.sweep(start + Duration::from_secs(89)).is_empty());
        let due = tracker.sweep(start + Duration::from_secs(111));
        let closes = due
            .iter()
            .filter(|a| matches!(a, ConnectionAction::Close(_)))
            .count();
        assert_eq!(closes, 200);
    }
}
