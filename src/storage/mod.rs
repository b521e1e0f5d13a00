//! Storage stage of the upload flow: stage, name, store, describe.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::remote::transport::HttpTransport;
use crate::upload::{
    self, AvatarUpload, FileUpload, PictureFileUpload, UploadArtifact, UploadPolicies,
    UrlPictureUpload, ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadVariant {
    Picture,
    Avatar,
    Url,
}

impl UploadVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Picture => "picture",
            Self::Avatar => "avatar",
            Self::Url => "url",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "picture" => Some(Self::Picture),
            "avatar" => Some(Self::Avatar),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPicture {
    pub key: String,
    pub url: String,
    pub name: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{variant} uploads take {expected}")]
    VariantMismatch {
        variant: &'static str,
        expected: &'static str,
    },
    #[error("object storage write failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait ObjectStorage: Send + Sync {
    /// Copies `source` under `key` and returns its public URL.
    fn put_file(&self, key: &str, source: &Path) -> Result<String, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into();
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn object_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ObjectStorage for LocalObjectStorage {
    fn put_file(&self, key: &str, source: &Path) -> Result<String, StorageError> {
        let target = self.object_path(key);
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::copy(source, target.as_path()).map_err(io_err)?;
        Ok(format!("{}/{key}", self.public_base_url))
    }
}

pub enum UploadInput<'a> {
    File(&'a FileUpload),
    Url(&'a str),
}

pub struct UploadPipeline<T, S> {
    picture: PictureFileUpload,
    avatar: AvatarUpload,
    url: UrlPictureUpload<T>,
    storage: S,
    temp_dir: PathBuf,
}

impl<T, S> UploadPipeline<T, S>
where
    T: HttpTransport,
    S: ObjectStorage,
{
    pub fn new(transport: T, storage: S, policies: UploadPolicies) -> Self {
        Self {
            picture: PictureFileUpload::new(policies.picture),
            avatar: AvatarUpload::new(policies.avatar),
            url: UrlPictureUpload::new(transport, policies.url),
            storage,
            temp_dir: upload::default_temp_dir(),
        }
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn upload(
        &self,
        variant: UploadVariant,
        input: UploadInput<'_>,
        path_prefix: &str,
    ) -> Result<StoredPicture, StorageError> {
        let artifact = match (variant, input) {
            (UploadVariant::Picture, UploadInput::File(file)) => {
                upload::stage(&self.picture, file, self.temp_dir.as_path())?
            }
            (UploadVariant::Avatar, UploadInput::File(file)) => {
                upload::stage(&self.avatar, file, self.temp_dir.as_path())?
            }
            (UploadVariant::Url, UploadInput::Url(url)) => {
                upload::stage(&self.url, url, self.temp_dir.as_path())?
            }
            (UploadVariant::Url, UploadInput::File(_)) => {
                return Err(StorageError::VariantMismatch {
                    variant: variant.as_str(),
                    expected: "a URL",
                })
            }
            (_, UploadInput::Url(_)) => {
                return Err(StorageError::VariantMismatch {
                    variant: variant.as_str(),
                    expected: "file content",
                })
            }
        };
        self.store(variant, &artifact, path_prefix)
    }

    pub fn upload_file(
        &self,
        variant: UploadVariant,
        file: &FileUpload,
        path_prefix: &str,
    ) -> Result<StoredPicture, StorageError> {
        self.upload(variant, UploadInput::File(file), path_prefix)
    }

    pub fn upload_url(&self, url: &str, path_prefix: &str) -> Result<StoredPicture, StorageError> {
        self.upload(UploadVariant::Url, UploadInput::Url(url), path_prefix)
    }

    fn store(
        &self,
        variant: UploadVariant,
        artifact: &UploadArtifact,
        path_prefix: &str,
    ) -> Result<StoredPicture, StorageError> {
        let key = object_key(path_prefix, artifact.suffix());
        let url = self.storage.put_file(key.as_str(), artifact.path())?;
        let meta = read_metadata(artifact.path());
        info!(
            variant = variant.as_str(),
            key = %key,
            size_bytes = artifact.size_bytes(),
            "picture stored"
        );
        Ok(StoredPicture {
            name: display_name(artifact.original_filename()),
            key,
            url,
            size_bytes: artifact.size_bytes(),
            width: meta.width,
            height: meta.height,
            scale: meta.scale,
            format: meta.format,
        })
    }
}

/// `{prefix}/{yyyy-mm-dd}_{16 hex}.{suffix}`; the random part keeps keys unguessable.
pub fn object_key(path_prefix: &str, suffix: &str) -> String {
    let date = Utc::now().format("%Y-%m-%d");
    let simple = Uuid::new_v4().simple().to_string();
    let random = &simple[..16];
    let prefix = path_prefix.trim().trim_matches('/');
    if prefix.is_empty() {
        format!("{date}_{random}.{suffix}")
    } else {
        format!("{prefix}/{date}_{random}.{suffix}")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct PictureMetadata {
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f64>,
    format: Option<String>,
}

fn read_metadata(path: &Path) -> PictureMetadata {
    let reader = match image::ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "picture metadata unavailable");
            return PictureMetadata::default();
        }
    };
    let format = reader
        .format()
        .and_then(|f| f.extensions_str().first().copied())
        .map(str::to_string);
    match reader.into_dimensions() {
        Ok((width, height)) => PictureMetadata {
            width: Some(width),
            height: Some(height),
            scale: aspect_scale(width, height),
            format,
        },
        Err(e) => {
            debug!(path = %path.display(), error = %e, "picture dimensions unreadable");
            PictureMetadata {
                format,
                ..PictureMetadata::default()
            }
        }
    }
}

fn aspect_scale(width: u32, height: u32) -> Option<f64> {
    if height == 0 {
        return None;
    }
    Some((f64::from(width) / f64::from(height) * 100.0).round() / 100.0)
}

fn display_name(original_filename: &str) -> String {
    match original_filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => original_filename.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_has_prefix_date_and_random_part() {
        let key = object_key("/public/user-7/", "png");
        let (prefix, file) = key.rsplit_once('/').expect("prefix separator");
        assert_eq!(prefix, "public/user-7");
        let (stem, suffix) = file.rsplit_once('.').expect("suffix");
        assert_eq!(suffix, "png");
        let (date, random) = stem.split_once('_').expect("date separator");
        assert_eq!(date.len(), 10);
        assert_eq!(random.len(), 16);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!object_key("", "jpg").contains('/'));
    }

    #[test]
    fn object_path_ignores_traversal_segments() {
        let storage = LocalObjectStorage::new("/srv/pictures", "https://cdn.test/");
        assert_eq!(
            storage.object_path("../a/./b.png"),
            PathBuf::from("/srv/pictures/a/b.png")
        );
    }

    #[test]
    fn aspect_scale_rounds_to_two_decimals() {
        assert_eq!(aspect_scale(1920, 1080), Some(1.78));
        assert_eq!(aspect_scale(10, 0), None);
    }

    #[test]
    fn display_name_drops_suffix() {
        assert_eq!(display_name("cat.final.png"), "cat.final");
        assert_eq!(display_name("picture"), "picture");
    }

    #[test]
    fn variant_parse_accepts_known_names() {
        assert_eq!(UploadVariant::parse(" Avatar "), Some(UploadVariant::Avatar));
        assert_eq!(UploadVariant::parse("zip"), None);
    }
}
