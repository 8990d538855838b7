//! Image download/resize/re-encode adapter (spec §4.4).
//!
//! Grounded in
//! `original_source/src/post_insights_analysis.py::download_and_resize_image`:
//! a size-capped download, RGBA/LA flattened onto a white background,
//! downscale to `max_dimension` on the longer edge with a high-quality
//! filter, then re-encoded keeping JPEG/PNG and falling back to PNG for
//! anything else.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;

use crate::domain::backoff::{retry_with_backoff, RetryPolicy, Sleeper, TokioSleeper};
use crate::domain::ports::{ImageError, ImagePreprocessor, ProcessedImage};

/// 50MiB cap on downloaded image payloads (spec §4.4).
const MAX_IMAGE_BYTES: u64 = 50 * 1024 * 1024;
const MAX_DIMENSION: u32 = 1024;
/// JPEG re-encode quality (spec §4.4), matching
/// `post_insights_analysis.py`'s `img.save(..., quality=85)`.
const JPEG_QUALITY: u8 = 85;

pub struct ImageHttpConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
}

/// Reqwest + `image`-crate backed [`ImagePreprocessor`].
pub struct HttpImagePreprocessor {
    client: Client,
    max_retries: u32,
    sleeper: TokioSleeper,
}

impl HttpImagePreprocessor {
    /// # Errors
    /// Returns [`ImageError::Download`] if the reqwest client cannot be
    /// constructed.
    pub fn new(config: ImageHttpConfig) -> Result<Self, ImageError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| ImageError::download(error.to_string()))?;
        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            sleeper: TokioSleeper,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let abort_predicate = |_: &ImageError| false;
        let outcome = retry_with_backoff(
            RetryPolicy {
                max_attempts: self.max_retries,
                base_delay: Duration::from_secs(1),
                abort_predicate: &abort_predicate,
            },
            &self.sleeper as &dyn Sleeper,
            || self.download_once(url),
        )
        .await;
        outcome.result
    }

    async fn download_once(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| ImageError::download(error.to_string()))?;

        if !response.status().is_success() {
            return Err(ImageError::download(format!(
                "HTTP {status}",
                status = response.status()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_IMAGE_BYTES {
                return Err(ImageError::download(format!(
                    "image exceeds {MAX_IMAGE_BYTES} byte cap ({length} bytes)"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| ImageError::download(error.to_string()))?;
        let max_bytes_usize = usize::try_from(MAX_IMAGE_BYTES).unwrap_or(usize::MAX);
        if bytes.len() > max_bytes_usize {
            return Err(ImageError::download(format!(
                "image exceeds {MAX_IMAGE_BYTES} byte cap"
            )));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImagePreprocessor for HttpImagePreprocessor {
    async fn process(&self, url: &str) -> ProcessedImage {
        match self.download(url).await {
            Ok(bytes) => match reencode(url, &bytes) {
                Ok((base64_data, mime_type)) => ProcessedImage {
                    source_url: url.to_owned(),
                    success: true,
                    base64_data,
                    mime_type,
                },
                Err(_) => failed(url),
            },
            Err(_) => failed(url),
        }
    }
}

fn failed(url: &str) -> ProcessedImage {
    ProcessedImage {
        source_url: url.to_owned(),
        success: false,
        base64_data: String::new(),
        mime_type: String::new(),
    }
}

/// Decode, flatten transparency, downscale, and re-encode per spec §4.4.
///
/// # Errors
/// Returns [`ImageError::Decode`] when the payload cannot be decoded or
/// re-encoded.
fn reencode(url: &str, bytes: &[u8]) -> Result<(String, String), ImageError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|error| ImageError::decode(error.to_string()))?;

    let flattened = flatten_transparency(decoded);
    let resized = downscale(flattened);

    let (format, mime_type) = output_format(url);
    let mut buffer = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            encoder
                .encode_image(&resized)
                .map_err(|error| ImageError::decode(error.to_string()))?;
        }
        _ => {
            resized
                .write_to(&mut buffer, format)
                .map_err(|error| ImageError::decode(error.to_string()))?;
        }
    }

    Ok((BASE64_STANDARD.encode(buffer.into_inner()), mime_type.to_owned()))
}

fn flatten_transparency(image: DynamicImage) -> DynamicImage {
    match &image {
        DynamicImage::ImageRgba8(_) | DynamicImage::ImageLumaA8(_) => {
            let rgba = image.to_rgba8();
            let (width, height) = (rgba.width(), rgba.height());
            let mut background =
                image::RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
            for (x, y, pixel) in rgba.enumerate_pixels() {
                let alpha = f64::from(pixel.0[3]) / 255.0;
                let blend = |channel: usize| blend_onto_white(pixel.0[channel], alpha);
                background.put_pixel(x, y, image::Rgb([blend(0), blend(1), blend(2)]));
            }
            DynamicImage::ImageRgb8(background)
        }
        _ => image,
    }
}

/// Alpha-composite one channel onto a white background, as PIL's
/// `Image.paste(img, mask=alpha)` does in the original.
fn blend_onto_white(channel: u8, alpha: f64) -> u8 {
    let fg = f64::from(channel);
    let mixed = fg.mul_add(alpha, 255.0 * (1.0 - alpha));
    #[expect(clippy::cast_possible_truncation, reason = "mixed is clamped to 0.0..=255.0 above")]
    let clamped = mixed.clamp(0.0, 255.0).round() as u8;
    clamped
}

fn downscale(image: DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return image;
    }

    let scale_w = f64::from(MAX_DIMENSION) / f64::from(width.max(1));
    let scale_h = f64::from(MAX_DIMENSION) / f64::from(height.max(1));
    let scale = scale_w.min(scale_h);

    let new_width = round_to_u32(f64::from(width) * scale);
    let new_height = round_to_u32(f64::from(height) * scale);

    image.resize(new_width, new_height, FilterType::Lanczos3)
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "value is a positive image dimension well under u32::MAX"
)]
fn round_to_u32(value: f64) -> u32 {
    value.round().max(1.0) as u32
}

fn output_format(url: &str) -> (ImageFormat, &'static str) {
    let lower = url.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        (ImageFormat::Jpeg, "image/jpeg")
    } else if lower.ends_with(".png") {
        (ImageFormat::Png, "image/png")
    } else {
        (ImageFormat::Png, "image/png")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://cdn.invalid/a.jpg", ImageFormat::Jpeg)]
    #[case("https://cdn.invalid/a.JPEG", ImageFormat::Jpeg)]
    #[case("https://cdn.invalid/a.png", ImageFormat::Png)]
    #[case("https://cdn.invalid/a.webp", ImageFormat::Png)]
    fn output_format_keeps_jpeg_and_png_else_falls_back_to_png(
        #[case] url: &str,
        #[case] expected: ImageFormat,
    ) {
        let (format, _) = output_format(url);
        assert_eq!(format, expected);
    }

    #[rstest]
    fn downscale_preserves_aspect_ratio_for_oversized_images() {
        let image = DynamicImage::new_rgb8(2048, 1024);
        let resized = downscale(image);
        assert_eq!(resized.width(), MAX_DIMENSION);
        assert_eq!(resized.height(), 512);
    }

    #[rstest]
    fn downscale_leaves_small_images_untouched() {
        let image = DynamicImage::new_rgb8(200, 100);
        let resized = downscale(image);
        assert_eq!((resized.width(), resized.height()), (200, 100));
    }

    #[rstest]
    fn flatten_transparency_is_noop_for_opaque_images() {
        let image = DynamicImage::new_rgb8(4, 4);
        let flattened = flatten_transparency(image);
        assert!(matches!(flattened, DynamicImage::ImageRgb8(_)));
    }

    #[rstest]
    fn reencode_round_trips_a_small_png() {
        let mut png_bytes = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(4, 4)
            .write_to(&mut png_bytes, ImageFormat::Png)
            .expect("encode fixture png");
        let (base64_data, mime_type) =
            reencode("https://cdn.invalid/a.png", png_bytes.get_ref()).expect("reencode");
        assert_eq!(mime_type, "image/png");
        assert!(!base64_data.is_empty());
    }

    fn gradient_fixture() -> DynamicImage {
        let mut image = image::RgbImage::new(16, 16);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "x/y are bounded by the 16x16 fixture size"
            )]
            let value = ((x * 16 + y) % 256) as u8;
            *pixel = image::Rgb([value, 255 - value, value / 2]);
        }
        DynamicImage::ImageRgb8(image)
    }

    #[rstest]
    fn reencode_jpeg_uses_quality_85_not_the_default_75() {
        let mut png_bytes = Cursor::new(Vec::new());
        gradient_fixture()
            .write_to(&mut png_bytes, ImageFormat::Png)
            .expect("encode fixture png");

        let (via_reencode, mime_type) =
            reencode("https://cdn.invalid/a.jpg", png_bytes.get_ref()).expect("reencode");
        assert_eq!(mime_type, "image/jpeg");

        let mut explicit_85_buffer = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut explicit_85_buffer, JPEG_QUALITY)
            .encode_image(&gradient_fixture())
            .expect("encode quality-85 jpeg");
        let explicit_85 = BASE64_STANDARD.encode(explicit_85_buffer.into_inner());

        let mut default_quality_buffer = Cursor::new(Vec::new());
        gradient_fixture()
            .write_to(&mut default_quality_buffer, ImageFormat::Jpeg)
            .expect("encode default-quality jpeg");
        let default_quality = BASE64_STANDARD.encode(default_quality_buffer.into_inner());

        assert_eq!(via_reencode, explicit_85);
        assert_ne!(via_reencode, default_quality);
    }
}
