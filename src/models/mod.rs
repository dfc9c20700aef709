use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// One stage of the three-stage wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Step {
    Requirements,
    Claim,
    Analysis,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Requirements, Step::Claim, Step::Analysis];

    pub fn number(self) -> u8 {
        match self {
            Step::Requirements => 1,
            Step::Claim => 2,
            Step::Analysis => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Step::Requirements),
            2 => Some(Step::Claim),
            3 => Some(Step::Analysis),
            _ => None,
        }
    }

    /// The upload that must be complete before this step is enabled
    pub fn prerequisite(self) -> Option<UploadStep> {
        match self {
            Step::Requirements => None,
            Step::Claim => Some(UploadStep::Requirements),
            Step::Analysis => Some(UploadStep::Claim),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {}", self.number())
    }
}

/// The two steps that accept a document upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UploadStep {
    Requirements,
    Claim,
}

impl UploadStep {
    pub fn step(self) -> Step {
        match self {
            UploadStep::Requirements => Step::Requirements,
            UploadStep::Claim => Step::Claim,
        }
    }

    pub fn next(self) -> Step {
        match self {
            UploadStep::Requirements => Step::Claim,
            UploadStep::Claim => Step::Analysis,
        }
    }

    /// Value of the `processing_type` form field for this upload
    pub fn processing_type(self) -> &'static str {
        match self {
            UploadStep::Requirements => "insurance_requirements",
            UploadStep::Claim => "insurance_claim",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            UploadStep::Requirements => "requirements document",
            UploadStep::Claim => "claim document",
        }
    }
}

impl From<UploadStep> for Step {
    fn from(step: UploadStep) -> Self {
        step.step()
    }
}

impl fmt::Display for UploadStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.step().fmt(f)
    }
}

/// Document identifiers recorded per upload step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIds {
    pub requirements: Option<String>,
    pub claim: Option<String>,
}

impl DocumentIds {
    pub fn get(&self, step: UploadStep) -> Option<&str> {
        match step {
            UploadStep::Requirements => self.requirements.as_deref(),
            UploadStep::Claim => self.claim.as_deref(),
        }
    }

    pub fn set(&mut self, step: UploadStep, id: Option<String>) {
        match step {
            UploadStep::Requirements => self.requirements = id,
            UploadStep::Claim => self.claim = id,
        }
    }
}

/// A file selected for upload
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Bytes,
    /// Content type declared by whoever picked the file
    pub declared_type: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            declared_type: None,
        }
    }

    pub fn with_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, using the file name as the upload name
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Path has no usable file name")?
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::new(name, data))
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lowercase text after the last dot. `.pdf` counts as a pdf.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Content type for the multipart part: the declared type when it parses,
    /// otherwise a guess from the extension.
    pub fn content_type(&self) -> mime::Mime {
        self.declared_type
            .as_deref()
            .and_then(|t| t.parse::<mime::Mime>().ok())
            .unwrap_or_else(|| guess_mime(self.extension().as_deref()))
    }
}

fn guess_mime(extension: Option<&str>) -> mime::Mime {
    let guessed = match extension {
        Some("pdf") => Some(mime::APPLICATION_PDF),
        Some("json") => Some(mime::APPLICATION_JSON),
        Some("txt") => Some(mime::TEXT_PLAIN_UTF_8),
        Some("md") => "text/markdown".parse().ok(),
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            .parse()
            .ok(),
        _ => None,
    };
    guessed.unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// One upload, from form submission to transport completion
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub step: UploadStep,
    pub file: UploadFile,
    pub endpoint: String,
    pub timeout: Duration,
    /// Extra multipart text fields sent next to `file`
    pub fields: Vec<(String, String)>,
    pub request_id: String,
}

/// Body of a successful upload response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub document_id: serde_json::Value,
}

/// Body sent to the analysis endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub claim_document_id: String,
    pub requirement_document_id: String,
    pub analysis_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub chat_id: serde_json::Value,
}

/// Documents the server already holds for the current user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub requirements_doc_id: Option<String>,
    #[serde(default, deserialize_with = "opaque_id_opt")]
    pub claim_doc_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Server ids are integers in some deployments and strings in others.
pub fn opaque_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn opaque_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(opaque_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_numbers() {
        for step in Step::ALL {
            assert_eq!(Step::from_number(step.number()), Some(step));
        }
        assert_eq!(Step::from_number(0), None);
        assert_eq!(UploadStep::Requirements.next(), Step::Claim);
        assert_eq!(Step::Analysis.prerequisite(), Some(UploadStep::Claim));
    }

    #[test]
    fn test_content_type_guess() {
        let file = UploadFile::new("Policy.PDF", vec![1u8, 2, 3]);
        assert_eq!(file.extension().as_deref(), Some("pdf"));
        assert_eq!(UploadFile::new(".json", Vec::new()).extension().as_deref(), Some("json"));
        assert_eq!(UploadFile::new("claim.v2.DOCX", Vec::new()).extension().as_deref(), Some("docx"));
        assert_eq!(UploadFile::new("doc.", Vec::new()).extension(), None);
        assert_eq!(UploadFile::new("README", Vec::new()).extension(), None);
        assert_eq!(file.content_type(), mime::APPLICATION_PDF);

        let file = UploadFile::new("notes", Vec::new()).with_type("not a mime");
        assert_eq!(file.content_type(), mime::APPLICATION_OCTET_STREAM);

        let file = UploadFile::new("a.txt", Vec::new()).with_type("text/plain");
        assert_eq!(file.content_type().essence_str(), "text/plain");
    }

    #[test]
    fn test_snapshot_accepts_numeric_ids() {
        let snapshot: WorkflowSnapshot =
            serde_json::from_str(r#"{"requirements_doc_id": 42, "claim_doc_id": null}"#).unwrap();
        assert_eq!(snapshot.requirements_doc_id.as_deref(), Some("42"));
        assert_eq!(snapshot.claim_doc_id, None);

        let snapshot: WorkflowSnapshot = serde_json::from_str("{}").unwrap();
        assert_eq!(snapshot, WorkflowSnapshot::default());
    }

    #[tokio::test]
    async fn test_from_path_reads_name_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claim.docx");
        tokio::fs::write(&path, b"PK\x03\x04").await.unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "claim.docx");
        assert_eq!(file.size(), 4);
    }
}
