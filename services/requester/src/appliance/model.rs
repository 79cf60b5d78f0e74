//! Appliance records and the rules for building them from a submission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use requester_reconcile::ApplianceStatus;
use serde::{Deserialize, Serialize};

use crate::image::ImageRecord;
use crate::store::Record;

/// Abstract resource request of an appliance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(alias = "cpu")]
    pub cpus: f64,
    #[serde(alias = "memory")]
    pub mem: f64,
    pub disk: f64,
}

impl Resources {
    /// Names of the quantities that are negative or not finite.
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        [("cpus", self.cpus), ("mem", self.mem), ("disk", self.disk)]
            .into_iter()
            .filter(|(_, value)| !value.is_finite() || *value < 0.0)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Where an appliance was placed.
///
/// Set once, when a backend accepts the placement, and never changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterBinding {
    /// Backend kind tag used to pick the cluster adapter.
    #[serde(rename = "type")]
    pub kind: String,

    /// Base URL of the backend orchestrator.
    pub url: String,

    /// Agent the placement was pinned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// A submitted appliance as the client sends it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAppliance {
    pub id: String,
    pub image: String,
    pub resources: Resources,
    pub data: serde_json::Value,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Persisted appliance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceRecord {
    pub id: String,
    pub image: String,
    pub resources: Resources,
    pub data: serde_json::Value,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub status: ApplianceStatus,
    #[serde(default)]
    pub cluster: Option<ClusterBinding>,
    pub submitted_at: DateTime<Utc>,
}

impl Record for ApplianceRecord {
    const KIND: &'static str = "appliance";

    fn id(&self) -> &str {
        &self.id
    }
}

impl ApplianceRecord {
    /// Build the effective appliance from a submission and its image.
    ///
    /// The appliance command wins over the image command. Image arguments
    /// come first and appliance arguments are appended. Image environment
    /// entries override appliance entries with the same key.
    pub fn from_submission(req: SubmitAppliance, image: &ImageRecord, now: DateTime<Utc>) -> Self {
        let cmd = req.cmd.or_else(|| image.cmd.clone());

        let args = if image.args.is_empty() {
            req.args
        } else {
            image.args.iter().cloned().chain(req.args).collect()
        };

        let mut env = req.env;
        env.extend(image.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            id: req.id,
            image: image.id.clone(),
            resources: req.resources,
            data: req.data,
            cmd,
            args,
            env,
            status: ApplianceStatus::Submitted,
            cluster: None,
            submitted_at: now,
        }
    }

    /// Whether the appliance has been placed on a cluster.
    pub fn is_bound(&self) -> bool {
        self.cluster.is_some()
    }
}

/// An appliance as returned to callers, enriched with live access points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplianceView {
    #[serde(flatten)]
    pub record: ApplianceRecord,
    pub access_points: Vec<String>,
}

impl From<ApplianceRecord> for ApplianceView {
    fn from(record: ApplianceRecord) -> Self {
        Self {
            record,
            access_points: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PortDescriptor;

    fn image(args: &[&str], env: &[(&str, &str)], cmd: Option<&str>) -> ImageRecord {
        ImageRecord {
            id: "nginx".to_string(),
            cmd: cmd.map(str::to_string),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ports: vec![PortDescriptor {
                container_port: 80,
                host_port: None,
                protocol: None,
            }],
            privileged: false,
        }
    }

    fn submission(args: &[&str], env: &[(&str, &str)], cmd: Option<&str>) -> SubmitAppliance {
        SubmitAppliance {
            id: "web-1".to_string(),
            image: "nginx".to_string(),
            resources: Resources {
                cpus: 1.0,
                mem: 512.0,
                disk: 100.0,
            },
            data: serde_json::json!({"owner": "team-a"}),
            cmd: cmd.map(str::to_string),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_image_args_precede_appliance_args() {
        let record = ApplianceRecord::from_submission(
            submission(&["--port", "81"], &[], None),
            &image(&["-g", "daemon off;"], &[], None),
            Utc::now(),
        );
        assert_eq!(record.args, vec!["-g", "daemon off;", "--port", "81"]);
    }

    #[test]
    fn test_appliance_args_used_when_image_declares_none() {
        let record = ApplianceRecord::from_submission(
            submission(&["--verbose"], &[], None),
            &image(&[], &[], None),
            Utc::now(),
        );
        assert_eq!(record.args, vec!["--verbose"]);
    }

    #[test]
    fn test_image_env_wins_on_conflict() {
        let record = ApplianceRecord::from_submission(
            submission(&[], &[("MODE", "dev"), ("USER_ONLY", "1")], None),
            &image(&[], &[("MODE", "prod")], None),
            Utc::now(),
        );
        assert_eq!(record.env.get("MODE").map(String::as_str), Some("prod"));
        assert_eq!(record.env.get("USER_ONLY").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_cmd_falls_back_to_image() {
        let from_image = ApplianceRecord::from_submission(
            submission(&[], &[], None),
            &image(&[], &[], Some("nginx")),
            Utc::now(),
        );
        assert_eq!(from_image.cmd.as_deref(), Some("nginx"));

        let overridden = ApplianceRecord::from_submission(
            submission(&[], &[], Some("sh -c true")),
            &image(&[], &[], Some("nginx")),
            Utc::now(),
        );
        assert_eq!(overridden.cmd.as_deref(), Some("sh -c true"));
    }

    #[test]
    fn test_new_record_is_submitted_and_unbound() {
        let record = ApplianceRecord::from_submission(
            submission(&[], &[], None),
            &image(&[], &[], None),
            Utc::now(),
        );
        assert_eq!(record.status, ApplianceStatus::Submitted);
        assert!(!record.is_bound());
    }

    #[test]
    fn test_resources_accept_short_aliases() {
        let resources: Resources =
            serde_json::from_value(serde_json::json!({"cpu": 1, "mem": 512, "disk": 100}))
                .unwrap();
        assert_eq!(resources.cpus, 1.0);
        assert!(resources.invalid_fields().is_empty());
    }

    #[test]
    fn test_resources_reject_negative_values() {
        let resources = Resources {
            cpus: -1.0,
            mem: f64::NAN,
            disk: 0.0,
        };
        assert_eq!(resources.invalid_fields(), vec!["cpus", "mem"]);
    }

    #[test]
    fn test_submission_requires_data() {
        let result: Result<SubmitAppliance, _> = serde_json::from_value(serde_json::json!({
            "id": "web-1",
            "image": "nginx",
            "resources": {"cpus": 1, "mem": 512, "disk": 100}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_view_serializes_access_points_alongside_record() {
        let record = ApplianceRecord::from_submission(
            submission(&[], &[], None),
            &image(&[], &[], None),
            Utc::now(),
        );
        let view = ApplianceView {
            record,
            access_points: vec!["h:30001 -> 80".to_string()],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "submitted");
        assert_eq!(json["accessPoints"][0], "h:30001 -> 80");
        assert!(json["cluster"].is_null());
    }
}
