//! Service grouping and monitoring policy
//!
//! Replicas of one service share a name prefix (`/web-app-1`, `/web-app-2`)
//! and are monitored as a single unit.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Leading separator some runtimes prepend to container names
const NAME_SEPARATOR: char = '/';

/// Separator between name tokens; the last token is the replica suffix
const TOKEN_SEPARATOR: char = '-';

/// Derive the service a container belongs to
///
/// Strips one leading `/` and drops the final hyphen-delimited token when
/// there is more than one.
pub fn resolve_service_name(raw_name: &str) -> String {
    let name = raw_name.strip_prefix(NAME_SEPARATOR).unwrap_or(raw_name);

    match name.rsplit_once(TOKEN_SEPARATOR) {
        Some((service, _replica)) => service.to_string(),
        None => name.to_string(),
    }
}

/// Include/exclude substring patterns deciding which containers are sampled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringPolicy {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl MonitoringPolicy {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    /// Policy accepting every container
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `raw_name` should be sampled. Exclusion always wins.
    pub fn should_monitor(&self, raw_name: &str) -> bool {
        if self
            .exclude
            .iter()
            .any(|pattern| raw_name.contains(pattern.as_str()))
        {
            return false;
        }

        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|pattern| raw_name.contains(pattern.as_str()))
    }
}

/// Free-function form of [`MonitoringPolicy::should_monitor`]
pub fn should_monitor(raw_name: &str, policy: &MonitoringPolicy) -> bool {
    policy.should_monitor(raw_name)
}

/// Shared, atomically replaceable policy snapshot
///
/// Readers take a snapshot once per cycle; a concurrent [`PolicyHandle::replace`]
/// only affects cycles that start afterwards.
#[derive(Debug, Clone)]
pub struct PolicyHandle {
    current: Arc<ArcSwap<MonitoringPolicy>>,
}

impl PolicyHandle {
    pub fn new(policy: MonitoringPolicy) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(policy)),
        }
    }

    /// Current policy snapshot
    pub fn snapshot(&self) -> Arc<MonitoringPolicy> {
        self.current.load_full()
    }

    /// Swap in a new policy, returning the previous one
    pub fn replace(&self, policy: MonitoringPolicy) -> Arc<MonitoringPolicy> {
        self.current.swap(Arc::new(policy))
    }
}

impl Default for PolicyHandle {
    fn default() -> Self {
        Self::new(MonitoringPolicy::allow_all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(include: &[&str], exclude: &[&str]) -> MonitoringPolicy {
        MonitoringPolicy::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_resolve_service_name() {
        assert_eq!(resolve_service_name("/web-app-3"), "web-app");
        assert_eq!(resolve_service_name("standalone"), "standalone");
        assert_eq!(resolve_service_name("/standalone"), "standalone");
        assert_eq!(resolve_service_name("api-1"), "api");
        assert_eq!(resolve_service_name("/my-app-web-2"), "my-app-web");
    }

    #[test]
    fn test_resolve_service_name_strips_one_separator_only() {
        assert_eq!(resolve_service_name("//web-1"), "/web");
        assert_eq!(resolve_service_name(""), "");
        assert_eq!(resolve_service_name("/"), "");
    }

    #[test]
    fn test_resolve_service_name_trailing_hyphen() {
        assert_eq!(resolve_service_name("web-"), "web");
        assert_eq!(resolve_service_name("-"), "");
    }

    #[test]
    fn test_exclude_only() {
        let policy = policy(&[], &["db"]);
        assert!(!should_monitor("app-db-1", &policy));
        assert!(should_monitor("app-api-1", &policy));
    }

    #[test]
    fn test_include_only() {
        let policy = policy(&["api"], &[]);
        assert!(!should_monitor("app-worker-1", &policy));
        assert!(should_monitor("app-api-1", &policy));
    }

    #[test]
    fn test_exclude_takes_precedence() {
        let policy = policy(&["app"], &["db"]);
        assert!(!policy.should_monitor("app-db-1"));
        assert!(policy.should_monitor("app-web-1"));
        assert!(!policy.should_monitor("cache-1"));
    }

    #[test]
    fn test_empty_policy_accepts_everything() {
        assert!(MonitoringPolicy::allow_all().should_monitor("anything"));
    }

    #[test]
    fn test_policy_handle_replace() {
        let handle = PolicyHandle::new(policy(&["api"], &[]));
        let before = handle.snapshot();

        let previous = handle.replace(policy(&[], &["api"]));

        assert_eq!(previous, before);
        assert!(before.should_monitor("app-api-1"));
        assert!(!handle.snapshot().should_monitor("app-api-1"));
    }
}
