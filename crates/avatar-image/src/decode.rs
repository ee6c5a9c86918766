use avatar_core::AvatarError;
use image::RgbaImage;

/// Decode sanitized bytes into an RGBA buffer with basic dimension sanity.
/// The caller decides whether a failure here means a fallback logo or an
/// aborted request.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, AvatarError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|err| AvatarError::processing(format!("failed to decode image bytes: {}", err)))?;
    let rgba = decoded.to_rgba8();
    if rgba.width() == 0 || rgba.height() == 0 {
        return Err(AvatarError::processing("decoded image has zero width or height"));
    }
    Ok(rgba)
}
