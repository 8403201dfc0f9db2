//! JSON bodies shared by the OTA endpoints

use serde::Serialize;

use crate::partition::PartitionLabel;
use crate::session::SessionSnapshot;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

pub const SUCCESS_BODY: &str = r#"{"status":"ok","message":"OTA complete, rebooting..."}"#;
pub const HEALTH_BODY: &str = r#"{"status":"ok"}"#;
pub const NOT_FOUND_BODY: &str = r#"{"error":"Not found"}"#;

#[derive(Debug, Serialize)]
pub struct VersionInfo<'a> {
    pub version: &'a str,
    /// SDK release the firmware was built against, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idf_version: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct OtaStatusReport {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub running_partition: Option<String>,
    pub update_partition: Option<String>,
}

impl OtaStatusReport {
    pub fn new(
        session: SessionSnapshot,
        running: Option<PartitionLabel>,
        update: Option<PartitionLabel>,
    ) -> Self {
        Self {
            session,
            running_partition: running.map(|l| l.to_string()),
            update_partition: update.map(|l| l.to_string()),
        }
    }
}

pub fn version_json(version: &str, idf_version: Option<&str>) -> serde_json::Result<String> {
    serde_json::to_string(&VersionInfo { version, idf_version })
}

pub fn status_json(report: &OtaStatusReport) -> serde_json::Result<String> {
    serde_json::to_string(report)
}
