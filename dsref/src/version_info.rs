use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// The denormalized, flat record of a single dataset head as cached in a
/// user's collection. Everything a listing needs without touching the
/// dataset store: authorship, the current commit, body stats, automation
/// state, filesystem link and remote counters.
///
/// Serialized field names match the legacy collection files, so skipping
/// empty fields keeps those files byte-stable across rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    /// Stable identifier of the dataset lineage, assigned at first
    /// creation. The join key across subsystems.
    #[serde(rename = "initID", default, skip_serializing_if = "String::is_empty")]
    pub init_id: String,
    #[serde(
        rename = "profileID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub profile_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    /// Mutable human handle; renames change this and nothing else.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Content address of the current head version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_title: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub commit_count: i64,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub body_size: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub body_rows: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub num_errors: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub meta_title: String,

    #[serde(rename = "runID", default, skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    /// One of "", "running", "succeeded", "failed", "unchanged".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_status: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub run_count: i64,
    /// Nanoseconds.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub run_duration: i64,

    /// Present iff automation is attached to the dataset.
    #[serde(
        rename = "workflowID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub workflow_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fsi_path: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub download_count: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub follower_count: i64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub open_issue_count: i64,
}

impl VersionInfo {
    pub fn new(
        init_id: impl Into<String>,
        profile_id: impl Into<String>,
        username: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            init_id: init_id.into(),
            profile_id: profile_id.into(),
            username: username.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// The fields every stored item must carry. Returns the name of the
    /// first missing field.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.init_id.is_empty() {
            Some("initID")
        } else if self.profile_id.is_empty() {
            Some("profileID")
        } else if self.username.is_empty() {
            Some("username")
        } else if self.name.is_empty() {
            Some("name")
        } else {
            None
        }
    }

    /// The reference this item answers to.
    pub fn dataset_ref(&self) -> crate::Ref {
        crate::Ref {
            username: self.username.clone(),
            name: self.name.clone(),
            profile_id: self.profile_id.clone(),
            init_id: self.init_id.clone(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_skipped_when_serializing() {
        let vi = VersionInfo::new("init", "profile", "alice", "weather");
        let json = serde_json::to_value(&vi).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "initID": "init",
                "profileID": "profile",
                "username": "alice",
                "name": "weather",
            })
        );
    }

    #[test]
    fn legacy_field_names_decode() {
        let vi: VersionInfo = serde_json::from_str(
            r#"{
                "initID": "init",
                "profileID": "profile",
                "username": "alice",
                "name": "weather",
                "path": "/ipfs/QmHead",
                "commitTitle": "initial commit",
                "commitCount": 2,
                "bodySize": 20,
                "runID": "run-1",
                "runStatus": "running",
                "workflowID": "wf-1",
                "fsiPath": "/home/alice/weather"
            }"#,
        )
        .unwrap();
        assert_eq!(vi.commit_count, 2);
        assert_eq!(vi.body_size, 20);
        assert_eq!(vi.run_id, "run-1");
        assert_eq!(vi.workflow_id, "wf-1");
        assert_eq!(vi.fsi_path, "/home/alice/weather");
    }

    #[test]
    fn required_fields_are_reported_in_order() {
        let mut vi = VersionInfo::default();
        assert_eq!(vi.missing_required_field(), Some("initID"));
        vi.init_id = "init".into();
        assert_eq!(vi.missing_required_field(), Some("profileID"));
        vi.profile_id = "profile".into();
        assert_eq!(vi.missing_required_field(), Some("username"));
        vi.username = "alice".into();
        assert_eq!(vi.missing_required_field(), Some("name"));
        vi.name = "weather".into();
        assert_eq!(vi.missing_required_field(), None);
    }
}
