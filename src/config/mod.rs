use crate::utils::validation::FileConstraints;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the document upload workflow
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Base URL of the chat backend (default: "http://127.0.0.1:5000")
    pub base_url: String,

    /// Maximum upload size in bytes (default: 16 MB)
    pub max_file_size: u64,

    /// Allowed file extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,

    /// Upload timeout in milliseconds (default: 30000)
    pub upload_timeout_ms: u64,

    /// Timeout for the analysis and workflow-state requests in milliseconds
    /// (default: 120000)
    pub analysis_timeout_ms: u64,

    /// Endpoint receiving the requirements document (step 1)
    pub requirements_endpoint: String,

    /// Endpoint receiving the claim document (step 2)
    pub claim_endpoint: String,

    /// Endpoint starting the analysis (step 3)
    pub analysis_endpoint: String,

    /// Endpoint reporting documents already known to the server
    pub workflow_state_endpoint: String,

    /// CSRF token sent with every mutating request
    pub csrf_token: Option<String>,

    /// Use byte-level progress when the transport supports it (default: true)
    pub native_progress: bool,

    /// Interval between synthetic progress ticks in milliseconds (default: 500)
    pub progress_tick_ms: u64,

    /// Percentage added per synthetic tick (default: 10)
    pub progress_step: u8,

    /// Highest synthetic percentage before the response arrives (default: 90)
    pub progress_ceiling: u8,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            max_file_size: 16 * 1024 * 1024, // 16 MB
            allowed_extensions: ["pdf", "docx", "txt", "md", "json"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            upload_timeout_ms: 30_000,
            analysis_timeout_ms: 120_000,
            requirements_endpoint: "/chat/upload".to_string(),
            claim_endpoint: "/chat/upload-claim".to_string(),
            analysis_endpoint: "/chat/insurance-analysis".to_string(),
            workflow_state_endpoint: "/chat/workflow-state".to_string(),
            csrf_token: None,
            native_progress: true,
            progress_tick_ms: 500,
            progress_step: 10,
            progress_ceiling: 90,
        }
    }
}

impl WorkflowConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, falling back to
    /// defaults for missing or unparseable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        Self {
            base_url: lookup("WORKFLOW_BASE_URL").unwrap_or(default.base_url),

            max_file_size: parse_var(&lookup, "MAX_FILE_SIZE")
                .unwrap_or(default.max_file_size),

            allowed_extensions: lookup("ALLOWED_EXTENSIONS")
                .map(|v| parse_extensions(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(default.allowed_extensions),

            upload_timeout_ms: parse_var(&lookup, "UPLOAD_TIMEOUT_MS")
                .unwrap_or(default.upload_timeout_ms),

            analysis_timeout_ms: parse_var(&lookup, "ANALYSIS_TIMEOUT_MS")
                .unwrap_or(default.analysis_timeout_ms),

            requirements_endpoint: lookup("REQUIREMENTS_UPLOAD_ENDPOINT")
                .unwrap_or(default.requirements_endpoint),

            claim_endpoint: lookup("CLAIM_UPLOAD_ENDPOINT").unwrap_or(default.claim_endpoint),

            analysis_endpoint: lookup("ANALYSIS_ENDPOINT").unwrap_or(default.analysis_endpoint),

            workflow_state_endpoint: lookup("WORKFLOW_STATE_ENDPOINT")
                .unwrap_or(default.workflow_state_endpoint),

            csrf_token: lookup("CSRF_TOKEN").filter(|t| !t.is_empty()),

            native_progress: lookup("NATIVE_PROGRESS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.native_progress),

            progress_tick_ms: parse_var(&lookup, "PROGRESS_TICK_MS")
                .unwrap_or(default.progress_tick_ms),

            progress_step: parse_var(&lookup, "PROGRESS_STEP").unwrap_or(default.progress_step),

            progress_ceiling: parse_var::<u8, _>(&lookup, "PROGRESS_CEILING")
                .map(|c| c.min(100))
                .unwrap_or(default.progress_ceiling),
        }
    }

    /// Same configuration pointed at another backend
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(1))
    }

    /// Constraints applied by `validate_file` before any upload starts
    pub fn constraints(&self) -> FileConstraints {
        FileConstraints {
            max_bytes: self.max_file_size,
            allowed_extensions: self.allowed_extensions.clone(),
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}
