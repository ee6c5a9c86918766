use avatar_core::AvatarError;
use image::{Rgba, RgbaImage};
use sha2::{Digest, Sha256};

pub const FALLBACK_LOGO_SIZE: u32 = 200;

const OUTLINE_WIDTH: f32 = 3.0;
const OUTLINE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LAST_RESORT_GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Deterministic color for a team id: the first three bytes of the SHA-256
/// digest become R, G, B, each clamped into [80, 200] to keep the result away
/// from near-black and near-white.
pub fn derive_team_color(team_id: &str) -> Rgba<u8> {
    let digest = Sha256::digest(team_id.as_bytes());
    Rgba([
        digest[0].clamp(80, 200),
        digest[1].clamp(80, 200),
        digest[2].clamp(80, 200),
        255,
    ])
}

/// Synthetic placeholder logo for a team whose real logo could not be
/// decoded. Never fails: a render problem degrades to a plain gray circle of
/// the same geometry.
pub fn fallback_logo(team_id: &str) -> RgbaImage {
    let color = derive_team_color(team_id);
    log::debug!(
        "rendering fallback logo for {} with color #{}",
        team_id,
        hex::encode([color[0], color[1], color[2]])
    );
    match render_circle(color, FALLBACK_LOGO_SIZE) {
        Ok(logo) => logo,
        Err(err) => {
            log::warn!("fallback circle render failed ({}); using a plain gray circle", err);
            draw_circle(LAST_RESORT_GRAY, FALLBACK_LOGO_SIZE, circle_radius(FALLBACK_LOGO_SIZE).max(1.0))
        }
    }
}

fn circle_radius(size: u32) -> f32 {
    // Inset by one eighth of the canvas on each side.
    size as f32 / 2.0 - size as f32 / 8.0
}

fn render_circle(fill: Rgba<u8>, size: u32) -> Result<RgbaImage, AvatarError> {
    if size == 0 {
        return Err(AvatarError::processing("fallback logo size must be positive"));
    }
    let radius = circle_radius(size);
    if radius <= OUTLINE_WIDTH {
        return Err(AvatarError::processing("fallback logo too small for its outline"));
    }
    Ok(draw_circle(fill, size, radius))
}

fn draw_circle(fill: Rgba<u8>, size: u32, radius: f32) -> RgbaImage {
    let center = size as f32 / 2.0;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 + 0.5 - center;
        let dy = y as f32 + 0.5 - center;
        let dist = (dx * dx + dy * dy).sqrt();
        if dist > radius {
            TRANSPARENT
        } else if dist > radius - OUTLINE_WIDTH {
            OUTLINE_COLOR
        } else {
            fill
        }
    })
}
