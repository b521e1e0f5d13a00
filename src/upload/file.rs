use std::fs::File;
use std::io::Write;

use super::{suffix_of, Materialized, UploadPolicy, UploadSource, ValidationError};

/// A file received from a client, e.g. one multipart form part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub original_filename: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(original_filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_filename: original_filename.into(),
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct PictureFileUpload {
    policy: UploadPolicy,
}

impl PictureFileUpload {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }
}

impl Default for PictureFileUpload {
    fn default() -> Self {
        Self::new(UploadPolicy::picture_default())
    }
}

impl UploadSource for PictureFileUpload {
    type Input = FileUpload;

    fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    fn validate(&self, input: &FileUpload) -> Result<(), ValidationError> {
        validate_file(&self.policy, input)
    }

    fn original_filename(&self, input: &FileUpload) -> Result<String, ValidationError> {
        Ok(input.original_filename.trim().to_string())
    }

    fn materialize_to_temp(
        &self,
        input: &FileUpload,
        file: &mut File,
    ) -> Result<Materialized, ValidationError> {
        write_bytes(input, file)
    }
}

/// Profile pictures: small, no webp.
#[derive(Debug, Clone)]
pub struct AvatarUpload {
    policy: UploadPolicy,
}

impl AvatarUpload {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }
}

impl Default for AvatarUpload {
    fn default() -> Self {
        Self::new(UploadPolicy::avatar_default())
    }
}

impl UploadSource for AvatarUpload {
    type Input = FileUpload;

    fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    fn validate(&self, input: &FileUpload) -> Result<(), ValidationError> {
        validate_file(&self.policy, input)
    }

    fn original_filename(&self, input: &FileUpload) -> Result<String, ValidationError> {
        Ok(input.original_filename.trim().to_string())
    }

    fn materialize_to_temp(
        &self,
        input: &FileUpload,
        file: &mut File,
    ) -> Result<Materialized, ValidationError> {
        write_bytes(input, file)
    }
}

fn validate_file(policy: &UploadPolicy, input: &FileUpload) -> Result<(), ValidationError> {
    if input.bytes.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    policy.check_size(input.size_bytes())?;
    let name = input.original_filename.trim();
    let suffix = suffix_of(name).ok_or_else(|| ValidationError::UnsupportedType(name.to_string()))?;
    policy.check_suffix(suffix)?;
    Ok(())
}

fn write_bytes(input: &FileUpload, file: &mut File) -> Result<Materialized, ValidationError> {
    file.write_all(input.bytes.as_slice())
        .map_err(ValidationError::IoFailure)?;
    Ok(Materialized {
        size_bytes: input.size_bytes(),
        content_type: None,
    })
}
