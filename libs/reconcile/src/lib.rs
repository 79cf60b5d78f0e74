//! Reconciliation primitives.
//!
//! This library turns what a backend orchestrator reports about a placed
//! workload into the view an appliance exposes to callers. Key concepts:
//!
//! - **Persisted state**: what the registry knows (submitted, bound or not).
//! - **Live state**: what the orchestrator reports for the workload's task.
//! - **Reconciled view**: recomputed on every read, never written back.
//!
//! # Invariants
//!
//! - All functions are pure and total
//! - Decisions are deterministic given the same inputs
//! - Access points are either a complete pairing or empty, never partial

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task state reported by the orchestrator while the workload runs.
pub const TASK_RUNNING: &str = "TASK_RUNNING";

/// Task state reported while the orchestrator is pulling and starting.
pub const TASK_STAGING: &str = "TASK_STAGING";

/// Task state reported once the workload has failed.
pub const TASK_FAILED: &str = "TASK_FAILED";

/// Lifecycle status of an appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplianceStatus {
    /// Accepted and persisted, no live observation yet.
    Submitted,

    /// The orchestrator is staging the task.
    Staging,

    /// The task is running.
    Running,

    /// The task failed.
    Failed,

    /// The orchestrator reported a state we do not track.
    Unknown,
}

impl ApplianceStatus {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Staging => "staging",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ApplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an orchestrator task state onto an appliance status.
///
/// The mapping is total: anything that is not one of the three tracked
/// states, including a missing state, is `Unknown`.
pub fn status_from_task_state(state: Option<&str>) -> ApplianceStatus {
    match state {
        Some(TASK_RUNNING) => ApplianceStatus::Running,
        Some(TASK_STAGING) => ApplianceStatus::Staging,
        Some(TASK_FAILED) => ApplianceStatus::Failed,
        _ => ApplianceStatus::Unknown,
    }
}

/// A reachable `host:port -> container port` mapping of a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPoint {
    pub host: String,
    pub host_port: u16,
    pub container_port: u16,
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}",
            self.host, self.host_port, self.container_port
        )
    }
}

/// Pair host-assigned ports with declared container ports by position.
///
/// The orchestrator assigns host ports in the order the container ports were
/// declared. When the counts differ the pairing is ambiguous and nothing is
/// returned.
pub fn derive_access_points(
    host: &str,
    host_ports: &[u16],
    container_ports: &[u16],
) -> Vec<AccessPoint> {
    if host_ports.len() != container_ports.len() {
        return Vec::new();
    }

    host_ports
        .iter()
        .zip(container_ports)
        .map(|(&host_port, &container_port)| AccessPoint {
            host: host.to_string(),
            host_port,
            container_port,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("TASK_RUNNING"), ApplianceStatus::Running)]
    #[case(Some("TASK_STAGING"), ApplianceStatus::Staging)]
    #[case(Some("TASK_FAILED"), ApplianceStatus::Failed)]
    #[case(Some("TASK_KILLED"), ApplianceStatus::Unknown)]
    #[case(Some("task_running"), ApplianceStatus::Unknown)]
    #[case(Some(""), ApplianceStatus::Unknown)]
    #[case(None, ApplianceStatus::Unknown)]
    fn test_status_mapping(#[case] state: Option<&str>, #[case] expected: ApplianceStatus) {
        assert_eq!(status_from_task_state(state), expected);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ApplianceStatus::Submitted).unwrap();
        assert_eq!(json, "\"submitted\"");

        let status: ApplianceStatus = serde_json::from_str("\"running\"").unwrap();
        assert_eq!(status, ApplianceStatus::Running);
    }

    #[test]
    fn test_access_points_pair_by_position() {
        let points = derive_access_points("10.0.0.5", &[30001, 30002], &[8080, 9090]);

        let rendered: Vec<String> = points.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["10.0.0.5:30001 -> 8080", "10.0.0.5:30002 -> 9090"]
        );
    }

    #[test]
    fn test_access_points_empty_on_count_mismatch() {
        assert!(derive_access_points("h", &[30001], &[8080, 9090]).is_empty());
        assert!(derive_access_points("h", &[30001, 30002], &[8080]).is_empty());
    }

    proptest! {
        #[test]
        fn prop_access_points_never_partial(
            host_ports in proptest::collection::vec(any::<u16>(), 0..6),
            container_ports in proptest::collection::vec(any::<u16>(), 0..6),
        ) {
            let points = derive_access_points("host", &host_ports, &container_ports);
            if host_ports.len() == container_ports.len() {
                prop_assert_eq!(points.len(), host_ports.len());
            } else {
                prop_assert!(points.is_empty());
            }
        }

        #[test]
        fn prop_status_mapping_total(state in ".*") {
            let status = status_from_task_state(Some(&state));
            prop_assert_ne!(status, ApplianceStatus::Submitted);
        }
    }
}
