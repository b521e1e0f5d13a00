pub mod file;
pub mod fetch;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

pub use file::{AvatarUpload, FileUpload, PictureFileUpload};
pub use fetch::UrlPictureUpload;

pub const ONE_MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("upload input is empty")]
    EmptyInput,
    #[error("unsupported file type '{0}'")]
    UnsupportedType(String),
    #[error("file size {} exceeds the {} limit", format_size(.size_bytes), format_size(.max_bytes))]
    TooLarge { size_bytes: u64, max_bytes: u64 },
    #[error("invalid picture URL: {0}")]
    InvalidUrl(String),
    #[error("upload staging failed: {0}")]
    IoFailure(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuffixCase {
    /// `photo.PNG` matches an allow-list entry of `png`.
    #[default]
    Insensitive,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: Option<u64>,
    pub allowed_suffixes: Vec<String>,
    pub suffix_case: SuffixCase,
}

impl UploadPolicy {
    pub fn new(max_bytes: Option<u64>, allowed_suffixes: &[&str]) -> Self {
        Self {
            max_bytes,
            allowed_suffixes: allowed_suffixes.iter().map(|s| s.to_string()).collect(),
            suffix_case: SuffixCase::default(),
        }
    }

    pub fn picture_default() -> Self {
        Self::new(None, &["jpeg", "jpg", "png", "webp", "gif"])
    }

    pub fn avatar_default() -> Self {
        Self::new(Some(ONE_MIB), &["jpg", "png", "jpeg", "gif"])
    }

    pub fn url_default() -> Self {
        Self::new(Some(2 * ONE_MIB), &["jpeg", "jpg", "png", "webp"])
    }

    pub fn with_suffix_case(mut self, suffix_case: SuffixCase) -> Self {
        self.suffix_case = suffix_case;
        self
    }

    pub fn check_size(&self, size_bytes: u64) -> Result<(), ValidationError> {
        match self.max_bytes {
            Some(max_bytes) if size_bytes > max_bytes => Err(ValidationError::TooLarge {
                size_bytes,
                max_bytes,
            }),
            _ => Ok(()),
        }
    }

    /// Returns the suffix as it will be used for storage keys.
    pub fn check_suffix(&self, suffix: &str) -> Result<String, ValidationError> {
        let allowed = match self.suffix_case {
            SuffixCase::Insensitive => self
                .allowed_suffixes
                .iter()
                .any(|s| s.eq_ignore_ascii_case(suffix)),
            SuffixCase::Exact => self.allowed_suffixes.iter().any(|s| s == suffix),
        };
        if !allowed {
            return Err(ValidationError::UnsupportedType(suffix.to_string()));
        }
        Ok(match self.suffix_case {
            SuffixCase::Insensitive => suffix.to_ascii_lowercase(),
            SuffixCase::Exact => suffix.to_string(),
        })
    }
}

/// Policies for every upload variant, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicies {
    pub picture: UploadPolicy,
    pub avatar: UploadPolicy,
    pub url: UploadPolicy,
}

impl Default for UploadPolicies {
    fn default() -> Self {
        Self {
            picture: UploadPolicy::picture_default(),
            avatar: UploadPolicy::avatar_default(),
            url: UploadPolicy::url_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Materialized {
    pub size_bytes: u64,
    pub content_type: Option<String>,
}

/// Variant-specific steps of the staging flow driven by [`stage`].
pub trait UploadSource {
    type Input: ?Sized;

    fn policy(&self) -> &UploadPolicy;
    fn validate(&self, input: &Self::Input) -> Result<(), ValidationError>;
    fn original_filename(&self, input: &Self::Input) -> Result<String, ValidationError>;
    fn materialize_to_temp(
        &self,
        input: &Self::Input,
        file: &mut File,
    ) -> Result<Materialized, ValidationError>;
}

/// A validated upload held in a temporary file. The file is removed when the artifact drops.
#[derive(Debug)]
pub struct UploadArtifact {
    temp: NamedTempFile,
    original_filename: String,
    size_bytes: u64,
    suffix: String,
}

impl UploadArtifact {
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn original_filename(&self) -> &str {
        self.original_filename.as_str()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn suffix(&self) -> &str {
        self.suffix.as_str()
    }
}

pub fn stage<S>(
    source: &S,
    input: &S::Input,
    temp_dir: &Path,
) -> Result<UploadArtifact, ValidationError>
where
    S: UploadSource + ?Sized,
{
    source.validate(input)?;
    let original_filename = source.original_filename(input)?;

    // Dropping `temp` on any early return below deletes the file.
    let mut temp = tempfile::Builder::new()
        .prefix("upload_")
        .tempfile_in(temp_dir)
        .map_err(ValidationError::IoFailure)?;
    let materialized = source.materialize_to_temp(input, temp.as_file_mut())?;
    temp.as_file_mut()
        .flush()
        .map_err(ValidationError::IoFailure)?;
    if materialized.size_bytes == 0 {
        return Err(ValidationError::EmptyInput);
    }
    source.policy().check_size(materialized.size_bytes)?;
    let suffix = resolve_suffix(
        source.policy(),
        original_filename.as_str(),
        materialized.content_type.as_deref(),
    )?;

    debug!(
        original_filename = %original_filename,
        size_bytes = materialized.size_bytes,
        suffix = %suffix,
        "upload staged"
    );
    Ok(UploadArtifact {
        temp,
        original_filename,
        size_bytes: materialized.size_bytes,
        suffix,
    })
}

pub fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn suffix_of(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, suffix) = name.rsplit_once('.')?;
    if stem.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(suffix)
}

pub fn suffix_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Human-readable size, e.g. `1.00 MB`.
pub fn format_size(size: &u64) -> String {
    let size = *size;
    if size == 0 {
        return String::from("unknown");
    }
    if size < 1024 {
        return format!("{size} B");
    }
    if size < ONE_MIB {
        return format!("{:.2} KB", size as f64 / 1024.0);
    }
    format!("{:.2} MB", size as f64 / ONE_MIB as f64)
}

fn resolve_suffix(
    policy: &UploadPolicy,
    original_filename: &str,
    content_type: Option<&str>,
) -> Result<String, ValidationError> {
    let from_name = suffix_of(original_filename);
    let from_type = content_type.and_then(suffix_for_content_type);
    let mut first_error = None;
    for candidate in [from_name, from_type].into_iter().flatten() {
        match policy.check_suffix(candidate) {
            Ok(suffix) => return Ok(suffix),
            Err(error) => {
                first_error.get_or_insert(error);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| ValidationError::UnsupportedType(String::from(""))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_policy_case_handling_is_explicit() {
        let insensitive = UploadPolicy::new(None, &["png"]);
        assert_eq!(insensitive.check_suffix("PNG").expect("upper ok"), "png");
        assert_eq!(insensitive.check_suffix("png").expect("lower ok"), "png");

        let exact = UploadPolicy::new(None, &["png"]).with_suffix_case(SuffixCase::Exact);
        assert!(matches!(
            exact.check_suffix("PNG"),
            Err(ValidationError::UnsupportedType(s)) if s == "PNG"
        ));
        assert_eq!(exact.check_suffix("png").expect("exact ok"), "png");
    }

    #[test]
    fn size_limit_is_optional() {
        assert!(UploadPolicy::picture_default().check_size(50 * ONE_MIB).is_ok());
        let err = UploadPolicy::avatar_default()
            .check_size(2 * ONE_MIB)
            .expect_err("avatar limit");
        assert_eq!(err.to_string(), "file size 2.00 MB exceeds the 1.00 MB limit");
    }

    #[test]
    fn suffix_of_reads_last_segment() {
        assert_eq!(suffix_of("photo.png"), Some("png"));
        assert_eq!(suffix_of("dir.v2/photo"), None);
        assert_eq!(suffix_of(".hidden"), None);
        assert_eq!(suffix_of("archive.tar.gz"), Some("gz"));
    }

    #[test]
    fn content_type_maps_to_suffix() {
        assert_eq!(suffix_for_content_type("image/jpeg; charset=binary"), Some("jpg"));
        assert_eq!(suffix_for_content_type("IMAGE/PNG"), Some("png"));
        assert_eq!(suffix_for_content_type("text/html"), None);
    }

    #[test]
    fn format_size_matches_display_units() {
        assert_eq!(format_size(&0), "unknown");
        assert_eq!(format_size(&512), "512 B");
        assert_eq!(format_size(&1536), "1.50 KB");
        assert_eq!(format_size(&ONE_MIB), "1.00 MB");
    }
}
