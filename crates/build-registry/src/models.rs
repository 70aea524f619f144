//! Data models for the build registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the optional descriptor file inside an uploaded archive
pub const DESCRIPTOR_FILENAME: &str = "BUILD_INFO.txt";

/// Descriptor text recorded when an archive carries no descriptor
pub const BUILD_INFO_UNAVAILABLE: &str = "not available";

/// Uploader recorded when the caller identity is not known
pub const UNKNOWN_UPLOADER: &str = "unknown";

/// One uploaded build archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    /// Unique build identifier, also the directory name under the builds root
    pub id: String,

    /// Name of the uploaded archive
    #[serde(rename = "filename")]
    pub original_filename: String,

    /// When the build was ingested
    pub uploaded_at: DateTime<Utc>,

    /// Human-readable size, e.g. "1.5 MB"
    #[serde(rename = "size")]
    pub display_size: String,

    pub size_bytes: u64,

    /// Descriptor text captured at ingestion time
    pub build_info: String,

    /// Whether this build is the active one
    pub deployed: bool,

    pub uploaded_by: String,
}

impl BuildRecord {
    /// Create a new, inactive build record
    pub fn new(
        id: String,
        original_filename: String,
        size_bytes: u64,
        build_info: String,
        uploaded_by: Option<&str>,
    ) -> Self {
        Self {
            id,
            original_filename,
            uploaded_at: Utc::now(),
            display_size: format_size(size_bytes),
            size_bytes,
            build_info,
            deployed: false,
            uploaded_by: uploaded_by.unwrap_or(UNKNOWN_UPLOADER).to_string(),
        }
    }
}

/// All known builds and which one is active
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Registry {
    /// Newest first
    pub builds: Vec<BuildRecord>,

    pub active_id: Option<String>,

    /// When the most recent successful deployment happened
    #[serde(rename = "lastDeployment")]
    pub last_deployment_at: Option<DateTime<Utc>>,
}

impl Registry {
    pub fn find(&self, id: &str) -> Option<&BuildRecord> {
        self.builds.iter().find(|b| b.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.builds.iter().position(|b| b.id == id)
    }

    /// Record currently pointed at by `active_id`
    pub fn active_build(&self) -> Option<&BuildRecord> {
        self.active_id.as_deref().and_then(|id| self.find(id))
    }

    /// Mark exactly one build as deployed
    pub fn mark_active(&mut self, id: &str, at: DateTime<Utc>) {
        for build in &mut self.builds {
            build.deployed = build.id == id;
        }
        self.active_id = Some(id.to_string());
        self.last_deployment_at = Some(at);
    }

    pub fn clear_active(&mut self) {
        for build in &mut self.builds {
            build.deployed = false;
        }
        self.active_id = None;
        self.last_deployment_at = None;
    }

    /// Whether `id` is the active build, by either flag or pointer
    pub fn is_active(&self, id: &str) -> bool {
        self.active_id.as_deref() == Some(id) || self.find(id).is_some_and(|b| b.deployed)
    }
}

/// Allocate a new time-ordered build id: `build_<unix-millis>_<8 hex>`
pub fn new_build_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("build_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Ids coming from callers are restricted to a safe path component
pub fn is_valid_build_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Render a byte count with binary units, rounded to 2 decimals
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}
