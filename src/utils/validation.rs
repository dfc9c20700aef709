use crate::models::UploadFile;
use std::fmt;

/// Maximum upload size: 16 MB
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024; // 16 MB

/// Extensions accepted by the document processor
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md", "json"];

/// Limits checked before an upload is handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConstraints {
    pub max_bytes: u64,
    /// Lowercase, without the leading dot
    pub allowed_extensions: Vec<String>,
}

impl Default for FileConstraints {
    fn default() -> Self {
        Self {
            max_bytes: MAX_FILE_SIZE,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl FileConstraints {
    fn allows(&self, extension: &str) -> bool {
        self.allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    }

    /// "PDF, DOCX, TXT" style listing for messages
    pub fn describe_extensions(&self) -> String {
        self.allowed_extensions
            .iter()
            .map(|e| e.to_uppercase())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    None,
    NoFile,
    TooLarge { size: u64, max: u64 },
    BadType { extension: Option<String>, allowed: String },
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::None => "NONE",
            ValidationReason::NoFile => "NO_FILE",
            ValidationReason::TooLarge { .. } => "TOO_LARGE",
            ValidationReason::BadType { .. } => "BAD_TYPE",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationReason::None => write!(f, "File is valid"),
            ValidationReason::NoFile => write!(f, "Please select a file"),
            ValidationReason::TooLarge { size, max } => write!(
                f,
                "File size ({}) exceeds {} limit",
                format_file_size(*size),
                format_file_size(*max)
            ),
            ValidationReason::BadType { allowed, .. } => {
                write!(f, "Invalid file type. Allowed types: {}", allowed)
            }
        }
    }
}

/// Outcome of the pre-flight checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub ok: bool,
    pub reason: ValidationReason,
}

impl ValidationResult {
    fn valid() -> Self {
        Self {
            ok: true,
            reason: ValidationReason::None,
        }
    }

    fn rejected(reason: ValidationReason) -> Self {
        Self { ok: false, reason }
    }

    pub fn into_result(self) -> Result<(), ValidationReason> {
        if self.ok { Ok(()) } else { Err(self.reason) }
    }
}

/// Checks presence, size and extension of a file. Pure.
pub fn validate_file(file: Option<&UploadFile>, constraints: &FileConstraints) -> ValidationResult {
    let Some(file) = file else {
        return ValidationResult::rejected(ValidationReason::NoFile);
    };

    if file.size() > constraints.max_bytes {
        return ValidationResult::rejected(ValidationReason::TooLarge {
            size: file.size(),
            max: constraints.max_bytes,
        });
    }

    match file.extension() {
        Some(ext) if constraints.allows(&ext) => ValidationResult::valid(),
        extension => ValidationResult::rejected(ValidationReason::BadType {
            extension,
            allowed: constraints.describe_extensions(),
        }),
    }
}

/// Validates and unwraps the selected file
pub fn require_valid(
    file: Option<UploadFile>,
    constraints: &FileConstraints,
) -> Result<UploadFile, ValidationReason> {
    validate_file(file.as_ref(), constraints).into_result()?;
    file.ok_or(ValidationReason::NoFile)
}

/// Formats a byte count as "1.5 MB" style text
pub fn format_file_size(bytes: u64) -> String {
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
