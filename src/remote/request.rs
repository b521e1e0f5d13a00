use std::fmt;
use std::str::FromStr;

use url::Url;

use super::{RemoteError, TaskKind};

pub const DEFAULT_OUTPAINTING_MODEL: &str = "image-out-painting";
pub const DEFAULT_TEXT_TO_IMAGE_MODEL: &str = "wanx2.1-t2i-plus";

const MAX_PROMPT_CHARS: usize = 800;
const MAX_NEGATIVE_PROMPT_CHARS: usize = 500;
const MIN_IMAGE_SIDE: u32 = 512;
const MAX_IMAGE_SIDE: u32 = 1440;
const MAX_IMAGE_COUNT: u8 = 4;
const OUTPUT_RATIOS: [&str; 6] = ["", "1:1", "3:4", "4:3", "9:16", "16:9"];

#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    Outpainting(OutpaintingRequest),
    TextToImage(TextToImageRequest),
}

impl TaskRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Outpainting(_) => TaskKind::Outpainting,
            Self::TextToImage(_) => TaskKind::TextToImage,
        }
    }
}

impl From<OutpaintingRequest> for TaskRequest {
    fn from(value: OutpaintingRequest) -> Self {
        Self::Outpainting(value)
    }
}

impl From<TextToImageRequest> for TaskRequest {
    fn from(value: TextToImageRequest) -> Self {
        Self::TextToImage(value)
    }
}

/// Output size as `W*H`, the separator the provider expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageSize {
    width: u32,
    height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Result<Self, RemoteError> {
        for side in [width, height] {
            if !(MIN_IMAGE_SIDE..=MAX_IMAGE_SIDE).contains(&side) {
                return Err(RemoteError::InvalidRequest(format!(
                    "image size sides must be within [{MIN_IMAGE_SIDE}, {MAX_IMAGE_SIDE}] px, got {width}*{height}"
                )));
            }
        }
        Ok(Self { width, height })
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*{}", self.width, self.height)
    }
}

impl FromStr for ImageSize {
    type Err = RemoteError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || RemoteError::InvalidRequest(format!("invalid image size '{trimmed}'"));
        let (w, h) = trimmed
            .split_once('*')
            .or_else(|| trimmed.split_once(|c: char| c == 'x' || c == 'X'))
            .ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(width, height)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutpaintingParameters {
    pub angle: Option<u16>,
    pub output_ratio: Option<String>,
    pub x_scale: Option<f32>,
    pub y_scale: Option<f32>,
    pub top_offset: Option<u32>,
    pub bottom_offset: Option<u32>,
    pub left_offset: Option<u32>,
    pub right_offset: Option<u32>,
    pub best_quality: Option<bool>,
    pub limit_image_size: Option<bool>,
    pub add_watermark: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutpaintingRequest {
    model: String,
    image_url: String,
    parameters: OutpaintingParameters,
}

impl OutpaintingRequest {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            model: String::from(DEFAULT_OUTPAINTING_MODEL),
            image_url: image_url.into().trim().to_string(),
            parameters: OutpaintingParameters::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_parameters(mut self, parameters: OutpaintingParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn model(&self) -> &str {
        self.model.as_str()
    }

    pub fn image_url(&self) -> &str {
        self.image_url.as_str()
    }

    pub fn parameters(&self) -> &OutpaintingParameters {
        &self.parameters
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        validate_model(self.model.as_str())?;
        if self.image_url.is_empty() {
            return invalid("image_url is required");
        }
        let parsed = Url::parse(self.image_url.as_str())
            .map_err(|e| RemoteError::InvalidRequest(format!("image_url is not a valid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return invalid("image_url must use http or https");
        }

        let p = &self.parameters;
        if let Some(angle) = p.angle {
            if angle > 359 {
                return invalid("angle must be within [0, 359]");
            }
        }
        if let Some(ratio) = p.output_ratio.as_deref() {
            if !OUTPUT_RATIOS.contains(&ratio.trim()) {
                return invalid(format!("unsupported output_ratio '{ratio}'"));
            }
        }
        for (name, scale) in [("x_scale", p.x_scale), ("y_scale", p.y_scale)] {
            if let Some(scale) = scale {
                if !(1.0..=3.0).contains(&scale) {
                    return invalid(format!("{name} must be within [1.0, 3.0]"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToImageRequest {
    model: String,
    prompt: String,
    negative_prompt: Option<String>,
    size: ImageSize,
    n: u8,
}

impl TextToImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: String::from(DEFAULT_TEXT_TO_IMAGE_MODEL),
            prompt: prompt.into(),
            negative_prompt: None,
            size: ImageSize::default(),
            n: 1,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.size = size;
        self
    }

    pub fn with_image_count(mut self, n: u8) -> Self {
        self.n = n;
        self
    }

    pub fn model(&self) -> &str {
        self.model.as_str()
    }

    pub fn prompt(&self) -> &str {
        self.prompt.as_str()
    }

    pub fn negative_prompt(&self) -> Option<&str> {
        self.negative_prompt.as_deref()
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn image_count(&self) -> u8 {
        self.n
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        validate_model(self.model.as_str())?;
        if self.prompt.trim().is_empty() {
            return invalid("prompt is required");
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return invalid(format!("prompt must not exceed {MAX_PROMPT_CHARS} characters"));
        }
        if let Some(negative) = self.negative_prompt.as_deref() {
            if negative.chars().count() > MAX_NEGATIVE_PROMPT_CHARS {
                return invalid(format!(
                    "negative_prompt must not exceed {MAX_NEGATIVE_PROMPT_CHARS} characters"
                ));
            }
        }
        if !(1..=MAX_IMAGE_COUNT).contains(&self.n) {
            return invalid(format!("n must be within [1, {MAX_IMAGE_COUNT}]"));
        }
        Ok(())
    }
}

fn validate_model(model: &str) -> Result<(), RemoteError> {
    if model.trim().is_empty() {
        return invalid("model must not be blank");
    }
    Ok(())
}

fn invalid<T>(message: impl Into<String>) -> Result<T, RemoteError> {
    Err(RemoteError::InvalidRequest(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_size_parses_both_separators() {
        assert_eq!(
            "1280*720".parse::<ImageSize>().expect("star separator"),
            ImageSize::new(1280, 720).expect("valid size")
        );
        assert_eq!(
            "768x1024".parse::<ImageSize>().expect("x separator").to_string(),
            "768*1024"
        );
        assert!("1024".parse::<ImageSize>().is_err());
        assert!("4096*4096".parse::<ImageSize>().is_err());
    }

    #[test]
    fn text_to_image_defaults_match_provider_defaults() {
        let req = TextToImageRequest::new("a red fox in snow");
        assert_eq!(req.model(), DEFAULT_TEXT_TO_IMAGE_MODEL);
        assert_eq!(req.size().to_string(), "1024*1024");
        assert_eq!(req.image_count(), 1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn text_to_image_rejects_out_of_range_count_and_blank_prompt() {
        let err = TextToImageRequest::new("fox")
            .with_image_count(5)
            .validate()
            .expect_err("n=5 should fail");
        assert!(matches!(err, RemoteError::InvalidRequest(msg) if msg.contains("n must be")));

        assert!(TextToImageRequest::new("fox").with_image_count(0).validate().is_err());
        assert!(TextToImageRequest::new("   ").validate().is_err());
        assert!(TextToImageRequest::new("x".repeat(801)).validate().is_err());
    }

    #[test]
    fn outpainting_requires_http_image_url() {
        assert!(OutpaintingRequest::new("").validate().is_err());
        assert!(OutpaintingRequest::new("not a url").validate().is_err());
        assert!(OutpaintingRequest::new("ftp://host/a.png").validate().is_err());
        assert!(OutpaintingRequest::new("https://cdn.example.test/a.png")
            .validate()
            .is_ok());
    }

    #[test]
    fn outpainting_rejects_out_of_range_parameters() {
        let base = OutpaintingRequest::new("https://cdn.example.test/a.png");
        let scale = base.clone().with_parameters(OutpaintingParameters {
            x_scale: Some(3.5),
            ..OutpaintingParameters::default()
        });
        assert!(scale.validate().is_err());

        let ratio = base.clone().with_parameters(OutpaintingParameters {
            output_ratio: Some(String::from("2:1")),
            ..OutpaintingParameters::default()
        });
        assert!(ratio.validate().is_err());

        let angle = base.with_parameters(OutpaintingParameters {
            angle: Some(360),
            ..OutpaintingParameters::default()
        });
        assert!(angle.validate().is_err());
    }
}
