mod common;

use std::io::Cursor;
use std::path::{Path, PathBuf};

use common::FakeTransport;
use picture_ai_backend_core::remote::transport::{HttpMethod, HttpReply, TransportError};
use picture_ai_backend_core::storage::{
    LocalObjectStorage, StorageError, UploadInput, UploadPipeline, UploadVariant,
};
use picture_ai_backend_core::upload::{
    self, FileUpload, PictureFileUpload, SuffixCase, UploadPolicies, ValidationError, ONE_MIB,
};
use pretty_assertions::assert_eq;
use uuid::Uuid;

const PUBLIC_BASE: &str = "https://cdn.example.test/pictures";

struct TestRoot {
    root: PathBuf,
}

impl TestRoot {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("picture_ai_{tag}_{}", Uuid::new_v4()));
        std::fs::create_dir_all(root.join("tmp")).expect("temp root must be creatable");
        Self { root }
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn staged_files(&self) -> usize {
        std::fs::read_dir(self.temp_dir())
            .expect("temp dir readable")
            .count()
    }

    fn pipeline(
        &self,
        transport: FakeTransport,
        policies: UploadPolicies,
    ) -> UploadPipeline<FakeTransport, LocalObjectStorage> {
        UploadPipeline::new(
            transport,
            LocalObjectStorage::new(self.root.join("objects"), PUBLIC_BASE),
            policies,
        )
        .with_temp_dir(self.temp_dir())
    }
}

impl Drop for TestRoot {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(self.root.as_path());
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("png should encode");
    out.into_inner()
}

fn assert_stored_under(root: &Path, key: &str) {
    let storage = LocalObjectStorage::new(root.join("objects"), PUBLIC_BASE);
    assert!(
        storage.object_path(key).is_file(),
        "object {key} should exist under {}",
        root.display()
    );
}

#[test]
fn picture_upload_stores_object_with_metadata() {
    let root = TestRoot::new("upload_picture");
    let pipeline = root.pipeline(FakeTransport::new(), UploadPolicies::default());

    let stored = pipeline
        .upload_file(
            UploadVariant::Picture,
            &FileUpload::new("Sunset.PNG", png_bytes(64, 32)),
            "public/user-1",
        )
        .expect("picture should upload");

    assert!(stored.key.starts_with("public/user-1/"));
    assert!(stored.key.ends_with(".png"));
    assert_eq!(stored.url, format!("{PUBLIC_BASE}/{}", stored.key));
    assert_eq!(stored.name, "Sunset");
    assert_eq!(stored.width, Some(64));
    assert_eq!(stored.height, Some(32));
    assert_eq!(stored.scale, Some(2.0));
    assert_eq!(stored.format.as_deref(), Some("png"));
    assert_stored_under(root.root.as_path(), stored.key.as_str());
    assert_eq!(root.staged_files(), 0, "staged temp file must be removed");
}

#[test]
fn two_mib_avatar_is_too_large_but_same_bytes_upload_as_picture() {
    let root = TestRoot::new("upload_avatar");
    let pipeline = root.pipeline(FakeTransport::new(), UploadPolicies::default());
    let big = FileUpload::new("me.jpg", vec![0xAB; (2 * ONE_MIB) as usize]);

    let err = pipeline
        .upload_file(UploadVariant::Avatar, &big, "avatars")
        .expect_err("avatar limit is 1 MiB");
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::TooLarge {
            size_bytes,
            max_bytes
        }) if size_bytes == 2 * ONE_MIB && max_bytes == ONE_MIB
    ));

    let stored = pipeline
        .upload_file(UploadVariant::Picture, &big, "public")
        .expect("pictures have no size limit");
    assert_eq!(stored.size_bytes, 2 * ONE_MIB);
    assert_eq!(stored.width, None, "undecodable content has no dimensions");
    assert_eq!(root.staged_files(), 0);
}

#[test]
fn bmp_is_unsupported_for_every_file_variant() {
    let root = TestRoot::new("upload_bmp");
    let pipeline = root.pipeline(FakeTransport::new(), UploadPolicies::default());
    let bmp = FileUpload::new("photo.bmp", vec![1, 2, 3]);

    for variant in [UploadVariant::Picture, UploadVariant::Avatar] {
        let err = pipeline
            .upload_file(variant, &bmp, "public")
            .expect_err("bmp must be rejected");
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::UnsupportedType(ref s)) if s == "bmp"
        ));
    }
}

#[test]
fn upper_case_suffix_follows_configured_case_policy() {
    let upper = FileUpload::new("photo.PNG", png_bytes(8, 8));
    let lower = FileUpload::new("photo.png", png_bytes(8, 8));
    let temp_root = TestRoot::new("upload_case");

    for file in [&upper, &lower] {
        let staged = upload::stage(&PictureFileUpload::default(), file, temp_root.temp_dir().as_path())
            .expect("insensitive policy accepts both");
        assert_eq!(staged.suffix(), "png");
    }

    let exact = PictureFileUpload::new(
        upload::UploadPolicy::picture_default().with_suffix_case(SuffixCase::Exact),
    );
    assert!(matches!(
        upload::stage(&exact, &upper, temp_root.temp_dir().as_path()),
        Err(ValidationError::UnsupportedType(ref s)) if s == "PNG"
    ));
    assert!(upload::stage(&exact, &lower, temp_root.temp_dir().as_path()).is_ok());
}

#[test]
fn empty_file_is_rejected() {
    let root = TestRoot::new("upload_empty");
    let pipeline = root.pipeline(FakeTransport::new(), UploadPolicies::default());
    let err = pipeline
        .upload_file(UploadVariant::Picture, &FileUpload::new("a.png", Vec::new()), "public")
        .expect_err("empty input");
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::EmptyInput)
    ));
}

#[test]
fn url_upload_probes_then_downloads() {
    let root = TestRoot::new("upload_url");
    let body = png_bytes(30, 20);
    let transport = FakeTransport::new();
    transport
        .push(Ok(HttpReply::new(200, Vec::new())
            .with_header("Content-Type", "image/png")
            .with_header("Content-Length", body.len().to_string())))
        .push(Ok(HttpReply::new(200, body.clone()).with_header("Content-Type", "image/png")));
    let pipeline = root.pipeline(transport.clone(), UploadPolicies::default());

    let stored = pipeline
        .upload_url("https://images.example.test/gallery/fox.png?w=30", "public/user-2")
        .expect("url upload succeeds");

    assert_eq!(transport.methods(), vec![HttpMethod::Head, HttpMethod::Get]);
    assert_eq!(stored.name, "fox");
    assert!(stored.key.ends_with(".png"));
    assert_eq!(stored.size_bytes, body.len() as u64);
    assert_eq!(stored.scale, Some(1.5));
    assert_stored_under(root.root.as_path(), stored.key.as_str());
}

#[test]
fn url_without_suffix_takes_it_from_content_type() {
    let root = TestRoot::new("upload_url_ctype");
    let transport = FakeTransport::new();
    transport
        .push(Err(TransportError::Client(String::from("HEAD not allowed"))))
        .push(Ok(
            HttpReply::new(200, png_bytes(4, 4)).with_header("content-type", "image/png")
        ));
    let pipeline = root.pipeline(transport, UploadPolicies::default());

    let stored = pipeline
        .upload_url("https://images.example.test/render", "public")
        .expect("probe failure is tolerated");
    assert!(stored.key.ends_with(".png"));
    assert_eq!(stored.name, "render");
}

#[test]
fn url_probe_rejects_non_image_without_downloading() {
    let root = TestRoot::new("upload_url_html");
    let transport = FakeTransport::new();
    transport.push(Ok(
        HttpReply::new(200, Vec::new()).with_header("Content-Type", "text/html; charset=utf-8")
    ));
    let pipeline = root.pipeline(transport.clone(), UploadPolicies::default());

    let err = pipeline
        .upload_url("https://example.test/index.html", "public")
        .expect_err("html is not a picture");
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::UnsupportedType(ref s)) if s == "text/html"
    ));
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn url_download_size_is_rechecked() {
    let root = TestRoot::new("upload_url_big");
    let transport = FakeTransport::new();
    transport
        .push(Ok(HttpReply::new(404, Vec::new())))
        .push(Ok(
            HttpReply::new(200, vec![0u8; (3 * ONE_MIB) as usize]).with_header("content-type", "image/jpeg")
        ));
    let pipeline = root.pipeline(transport.clone(), UploadPolicies::default());

    let err = pipeline
        .upload_url("https://example.test/huge.jpg", "public")
        .expect_err("3 MiB exceeds the 2 MiB url limit");
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::TooLarge { max_bytes, .. }) if max_bytes == 2 * ONE_MIB
    ));
    assert_eq!(root.staged_files(), 0);

    let seen = transport.seen();
    assert_eq!(seen[0].max_body_bytes, None, "HEAD carries no body cap");
    assert_eq!(
        seen[1].max_body_bytes,
        Some(2 * ONE_MIB),
        "download must be capped at the policy limit"
    );
}

#[test]
fn oversized_download_reports_declared_length() {
    let root = TestRoot::new("upload_url_declared");
    let transport = FakeTransport::new();
    transport
        .push(Err(TransportError::Client(String::from("HEAD not allowed"))))
        .push(Ok(HttpReply::new(200, vec![0u8; (2 * ONE_MIB + 1) as usize])
            .with_header("content-type", "image/png")
            .with_header("Content-Length", (5 * ONE_MIB).to_string())));
    let pipeline = root.pipeline(transport, UploadPolicies::default());

    let err = pipeline
        .upload_url("https://example.test/stream.png", "public")
        .expect_err("body over the cap is rejected");
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::TooLarge { size_bytes, max_bytes })
            if size_bytes == 5 * ONE_MIB && max_bytes == 2 * ONE_MIB
    ));
}

#[test]
fn url_upload_rejects_bad_urls_before_any_request() {
    let root = TestRoot::new("upload_url_bad");
    let transport = FakeTransport::new();
    let pipeline = root.pipeline(transport.clone(), UploadPolicies::default());

    for bad in ["ftp://example.test/a.png", "not a url"] {
        let err = pipeline.upload_url(bad, "public").expect_err("invalid url");
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::InvalidUrl(_))
        ));
    }
    assert!(matches!(
        pipeline.upload_url("  ", "public"),
        Err(StorageError::Validation(ValidationError::EmptyInput))
    ));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn variant_and_input_must_agree() {
    let root = TestRoot::new("upload_mismatch");
    let pipeline = root.pipeline(FakeTransport::new(), UploadPolicies::default());
    let file = FileUpload::new("a.png", vec![1]);

    let err = pipeline
        .upload(UploadVariant::Url, UploadInput::File(&file), "public")
        .expect_err("url variant needs a url");
    assert!(matches!(err, StorageError::VariantMismatch { .. }));

    let err = pipeline
        .upload(
            UploadVariant::Avatar,
            UploadInput::Url("https://example.test/a.png"),
            "public",
        )
        .expect_err("avatar variant needs file content");
    assert!(matches!(err, StorageError::VariantMismatch { .. }));
}
