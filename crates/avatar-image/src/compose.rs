use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Instant;

use avatar_core::{
    AvatarError, CircuitBreaker, LogoFetcher, TelemetryEvent, TelemetryEventType, TelemetrySink,
};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::crop::crop_transparent_border;
use crate::decode::decode_rgba;
use crate::fallback::fallback_logo;
use crate::sanitize::sanitize_payload;

const PADDING_RATIO: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct CombineRequest {
    pub logo_url_1: String,
    pub logo_url_2: String,
    /// Already-resolved background path; `None` keeps the canvas transparent.
    pub background: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSpec {
    pub combined_width: u32,
    pub combined_height: u32,
    pub padding_horizontal: u32,
    pub padding_vertical: u32,
    pub size: u32,
}

/// Canvas geometry for the combined logos: 10% padding on each side, square,
/// never smaller than 1x1.
pub fn canvas_spec(combined_width: u32, combined_height: u32) -> CanvasSpec {
    let padding_horizontal = (combined_width as f64 * PADDING_RATIO) as u32;
    let padding_vertical = (combined_height as f64 * PADDING_RATIO) as u32;
    let size = 1u32
        .max(combined_width + 2 * padding_horizontal)
        .max(combined_height + 2 * padding_vertical);
    CanvasSpec {
        combined_width,
        combined_height,
        padding_horizontal,
        padding_vertical,
        size,
    }
}

/// Public pipeline entry point: gates on the circuit breaker and brackets the
/// run with telemetry events carrying durations.
pub fn combine_with_telemetry(
    fetcher: &dyn LogoFetcher,
    request: &CombineRequest,
    breaker: &CircuitBreaker,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<RgbaImage, AvatarError> {
    breaker.check()?;
    let start = Instant::now();
    emit(telemetry, TelemetryEventType::CombineStart, None, None, None);
    match combine_logos(fetcher, request, telemetry) {
        Ok(canvas) => {
            breaker.record_success();
            emit(
                telemetry,
                TelemetryEventType::CombineSuccess,
                None,
                Some(start.elapsed().as_millis() as u64),
                Some(format!("canvas={}x{}", canvas.width(), canvas.height())),
            );
            Ok(canvas)
        }
        Err(err) => {
            breaker.record_failure();
            emit(
                telemetry,
                TelemetryEventType::CombineError,
                None,
                Some(start.elapsed().as_millis() as u64),
                Some(err.to_string()),
            );
            Err(err)
        }
    }
}

/// Fetch, repair, crop and composite both logos onto a padded square canvas.
pub fn combine_logos(
    fetcher: &dyn LogoFetcher,
    request: &CombineRequest,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<RgbaImage, AvatarError> {
    let mut logo1 = process_slot(fetcher, &request.logo_url_1, telemetry)?;
    let mut logo2 = process_slot(fetcher, &request.logo_url_2, telemetry)?;

    if logo1.height() == 0 || logo2.height() == 0 {
        return Err(AvatarError::processing("a logo has zero height after cropping"));
    }
    let target_height = logo1.height().min(logo2.height());

    // Only the taller logo is resized; equal heights take neither branch.
    if logo1.height() > target_height {
        logo1 = resize_to_height(logo1, target_height);
    } else if logo2.height() > target_height {
        logo2 = resize_to_height(logo2, target_height);
    }

    let combined_width = logo1.width() + logo2.width();
    let combined_height = target_height;
    if combined_width == 0 || combined_height == 0 {
        return Err(AvatarError::processing("combined logo area is empty"));
    }

    let spec = canvas_spec(combined_width, combined_height);
    let mut canvas = RgbaImage::from_pixel(spec.size, spec.size, Rgba([0, 0, 0, 0]));

    match &request.background {
        Some(path) => apply_background(&mut canvas, path, spec.size),
        None => log::debug!("no background configured; keeping the canvas transparent"),
    }

    // Signed math: a logo that dodged its resize can be taller than the
    // canvas, and overlay clips negative offsets.
    let x1 = spec.padding_horizontal as i64;
    let y1 = (spec.size as i64 - logo1.height() as i64) / 2;
    let x2 = x1 + logo1.width() as i64;
    let y2 = (spec.size as i64 - logo2.height() as i64) / 2;
    imageops::overlay(&mut canvas, &logo1, x1, y1);
    imageops::overlay(&mut canvas, &logo2, x2, y2);
    Ok(canvas)
}

/// One logo slot: validate the URL, fetch, sanitize, decode (falling back to
/// a synthetic logo when decoding fails) and crop.
fn process_slot(
    fetcher: &dyn LogoFetcher,
    url: &str,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<RgbaImage, AvatarError> {
    validate_logo_url(url)?;
    let team = team_id_from_url(url);

    emit(
        telemetry,
        TelemetryEventType::FetchStart,
        Some(team.clone()),
        None,
        Some(url.to_string()),
    );
    let fetch_start = Instant::now();
    let payload = match fetcher.fetch_logo(url) {
        Ok(payload) => {
            emit(
                telemetry,
                TelemetryEventType::FetchSuccess,
                Some(team.clone()),
                Some(fetch_start.elapsed().as_millis() as u64),
                Some(format!("bytes={}", payload.body.len())),
            );
            payload
        }
        Err(err) => {
            emit(
                telemetry,
                TelemetryEventType::FetchError,
                Some(team.clone()),
                Some(fetch_start.elapsed().as_millis() as u64),
                Some(err.to_string()),
            );
            return Err(err);
        }
    };

    let clean = sanitize_payload(&payload.body);
    let decoded = match decode_rgba(clean) {
        Ok(image) => image,
        Err(err) => {
            log::warn!("decoding logo for team {} failed ({}); substituting a fallback logo", team, err);
            emit(
                telemetry,
                TelemetryEventType::FallbackUsed,
                Some(team.clone()),
                None,
                Some(err.to_string()),
            );
            fallback_logo(&team)
        }
    };

    let cropped = crop_transparent_border(DynamicImage::ImageRgba8(decoded)).to_rgba8();
    if cropped.width() == 0 || cropped.height() == 0 {
        return Err(AvatarError::processing(format!(
            "logo for team {} has no visible content after cropping",
            team
        )));
    }
    Ok(cropped)
}

fn validate_logo_url(url: &str) -> Result<(), AvatarError> {
    if url.trim().is_empty() {
        return Err(AvatarError::validation("logo URL must be a non-empty string"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(AvatarError::validation(format!("logo URL must be http(s): {}", url)));
    }
    Ok(())
}

/// Team identifier from the URL's last path segment, extension stripped.
fn team_id_from_url(url: &str) -> String {
    let segment = url.trim_end_matches('/').rsplit('/').next().unwrap_or(url);
    let stem = segment.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(segment);
    if stem.is_empty() {
        segment.to_string()
    } else {
        stem.to_string()
    }
}

fn resize_to_height(logo: RgbaImage, target_height: u32) -> RgbaImage {
    let ratio = target_height as f64 / logo.height() as f64;
    let new_width = (logo.width() as f64 * ratio).round() as u32;
    if new_width == 0 || target_height == 0 {
        log::warn!("skipping logo resize: computed dimensions would be empty");
        return logo;
    }
    imageops::resize(&logo, new_width, target_height, FilterType::Lanczos3)
}

// Background problems never fail the request; the canvas just stays
// transparent.
fn apply_background(canvas: &mut RgbaImage, path: &Path, size: u32) {
    match load_background(path, size) {
        Ok(background) => {
            imageops::replace(canvas, &background, 0, 0);
            log::info!("applied background image {}", path.display());
        }
        Err(err) => log::warn!("proceeding without background: {}", err),
    }
}

fn load_background(path: &Path, size: u32) -> Result<RgbaImage, AvatarError> {
    let background = image::open(path)
        .map_err(|err| AvatarError::processing(format!("failed to load background {}: {}", path.display(), err)))?
        .to_rgba8();
    let (width, height) = background.dimensions();
    if width == 0 || height == 0 {
        return Err(AvatarError::processing(format!(
            "background {} has a zero dimension",
            path.display()
        )));
    }
    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;
    let square = imageops::crop_imm(&background, left, top, side, side).to_image();
    Ok(imageops::resize(&square, size, size, FilterType::Lanczos3))
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, AvatarError> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|err| AvatarError::processing(format!("failed to encode png: {}", err)))?;
    Ok(out)
}

fn emit(
    telemetry: Option<&dyn TelemetrySink>,
    event_type: TelemetryEventType,
    team: Option<String>,
    duration_ms: Option<u64>,
    detail: Option<String>,
) {
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type,
            team,
            duration_ms,
            detail,
        });
    }
}
