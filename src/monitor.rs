//! Activity monitoring: rate limits and anomaly heuristics
//!
//! Process-wide state shared across runs and principals, mutated only
//! through the synchronized entry points here:
//! - Fixed-window hourly rate limits keyed by (principal, action class)
//! - A bounded activity ring used for anomaly scoring
//! - Fan-out detection over the trailing five minutes

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate-limit window
const WINDOW: Duration = Duration::from_secs(3600);
/// Anomaly inspection window
const ANOMALY_WINDOW: Duration = Duration::from_secs(300);
/// Raw event count above which a principal is anomalous
const ANOMALY_EVENT_THRESHOLD: usize = 50;
/// Distinct target count above which a principal is anomalous
const ANOMALY_TARGET_THRESHOLD: usize = 10;
/// Activity ring capacity, process-wide
const ACTIVITY_CAP: usize = 1000;
/// Entries kept when the ring overflows
const ACTIVITY_KEEP: usize = 500;

/// One logged activity event
#[derive(Debug, Clone)]
struct Activity {
    principal: String,
    #[allow(dead_code)]
    action: String,
    target: String,
    at: Instant,
}

#[derive(Default)]
struct MonitorState {
    /// (principal:class) -> timestamps within the window
    rate_windows: HashMap<String, Vec<Instant>>,
    /// Bounded recent-activity log
    activities: Vec<Activity>,
}

/// Shared rate/anomaly monitor
#[derive(Clone, Default)]
pub struct ActivityMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hourly ceiling for an action class
    fn class_limit(action_class: &str) -> usize {
        match action_class {
            "scan" => 10,
            "recon" => 5,
            "exploit" => 3,
            _ => 20,
        }
    }

    /// Check the hourly rate limit for (principal, action class) and, if
    /// under the ceiling, record this event against it.
    pub fn check_rate_limit(&self, principal: &str, action_class: &str) -> bool {
        self.check_rate_limit_at(principal, action_class, Instant::now())
    }

    fn check_rate_limit_at(&self, principal: &str, action_class: &str, now: Instant) -> bool {
        let mut state = self.state.lock().expect("monitor lock poisoned");
        let key = format!("{principal}:{action_class}");
        let entries = state.rate_windows.entry(key).or_default();

        // Lazy pruning of entries outside the window
        entries.retain(|&t| now.duration_since(t) < WINDOW);

        let limit = Self::class_limit(action_class);
        if entries.len() >= limit {
            warn!(principal, action_class, limit, "rate limit exceeded");
            return false;
        }

        entries.push(now);
        true
    }

    /// Record an activity event for anomaly scoring
    pub fn log_activity(&self, principal: &str, action: &str, target: &str) {
        self.log_activity_at(principal, action, target, Instant::now());
    }

    fn log_activity_at(&self, principal: &str, action: &str, target: &str, at: Instant) {
        let mut state = self.state.lock().expect("monitor lock poisoned");
        state.activities.push(Activity {
            principal: principal.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            at,
        });

        // Keep only the most recent entries once the cap is hit
        if state.activities.len() > ACTIVITY_CAP {
            let excess = state.activities.len() - ACTIVITY_KEEP;
            state.activities.drain(..excess);
            debug!(kept = ACTIVITY_KEEP, "activity log truncated");
        }
    }

    /// Whether the principal's recent activity looks like a fan-out pattern
    /// inconsistent with a focused test: too many events, or too many
    /// distinct targets, inside the trailing five minutes.
    pub fn is_anomalous(&self, principal: &str) -> bool {
        self.is_anomalous_at(principal, Instant::now())
    }

    fn is_anomalous_at(&self, principal: &str, now: Instant) -> bool {
        let state = self.state.lock().expect("monitor lock poisoned");
        let recent: Vec<&Activity> = state
            .activities
            .iter()
            .filter(|a| a.principal == principal && now.duration_since(a.at) < ANOMALY_WINDOW)
            .collect();

        if recent.len() > ANOMALY_EVENT_THRESHOLD {
            return true;
        }

        let targets: HashSet<&str> = recent.iter().map(|a| a.target.as_str()).collect();
        targets.len() > ANOMALY_TARGET_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_scan_class() {
        let monitor = ActivityMonitor::new();
        for i in 0..10 {
            assert!(
                monitor.check_rate_limit("user1", "scan"),
                "scan {i} should be allowed"
            );
        }
        assert!(!monitor.check_rate_limit("user1", "scan"));
        // Other classes and principals are unaffected
        assert!(monitor.check_rate_limit("user1", "recon"));
        assert!(monitor.check_rate_limit("user2", "scan"));
    }

    #[test]
    fn test_rate_limit_default_class() {
        let monitor = ActivityMonitor::new();
        for _ in 0..20 {
            assert!(monitor.check_rate_limit("user1", "report"));
        }
        assert!(!monitor.check_rate_limit("user1", "report"));
    }

    #[test]
    fn test_rate_limit_window_expiry() {
        let monitor = ActivityMonitor::new();
        let start = Instant::now();
        for _ in 0..3 {
            assert!(monitor.check_rate_limit_at("user1", "exploit", start));
        }
        assert!(!monitor.check_rate_limit_at("user1", "exploit", start));

        // One hour later the window has rolled over
        let later = start + WINDOW + Duration::from_secs(1);
        assert!(monitor.check_rate_limit_at("user1", "exploit", later));
    }

    #[test]
    fn test_anomaly_distinct_targets() {
        let monitor = ActivityMonitor::new();
        let now = Instant::now();
        for i in 0..11 {
            monitor.log_activity_at("user1", "scan", &format!("https://t{i}.example"), now);
        }
        assert!(monitor.is_anomalous_at("user1", now));
    }

    #[test]
    fn test_focused_activity_not_anomalous() {
        let monitor = ActivityMonitor::new();
        let now = Instant::now();
        for _ in 0..5 {
            monitor.log_activity_at("user1", "scan", "https://example.com", now);
        }
        assert!(!monitor.is_anomalous_at("user1", now));
    }

    #[test]
    fn test_anomaly_event_count() {
        let monitor = ActivityMonitor::new();
        let now = Instant::now();
        for _ in 0..51 {
            monitor.log_activity_at("user1", "scan", "https://example.com", now);
        }
        assert!(monitor.is_anomalous_at("user1", now));
    }

    #[test]
    fn test_old_activity_ignored() {
        let monitor = ActivityMonitor::new();
        let start = Instant::now();
        for i in 0..11 {
            monitor.log_activity_at("user1", "scan", &format!("https://t{i}.example"), start);
        }
        let later = start + ANOMALY_WINDOW + Duration::from_secs(1);
        assert!(!monitor.is_anomalous_at("user1", later));
    }

    #[test]
    fn test_activity_ring_is_bounded() {
        let monitor = ActivityMonitor::new();
        for i in 0..1200 {
            monitor.log_activity("user1", "scan", &format!("https://t{}.example", i % 3));
        }
        let len = monitor.state.lock().unwrap().activities.len();
        assert!(len <= ACTIVITY_CAP);
    }
}
