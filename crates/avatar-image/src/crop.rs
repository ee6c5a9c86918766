use image::{imageops, DynamicImage, RgbaImage};

/// Crop away fully transparent borders. Images without an alpha channel are
/// returned unchanged, as is a fully transparent image (warned about, not an
/// error).
pub fn crop_transparent_border(image: DynamicImage) -> DynamicImage {
    if !image.color().has_alpha() {
        return image;
    }
    let rgba = image.to_rgba8();
    match opaque_bounds(&rgba) {
        Some((x, y, width, height)) => {
            DynamicImage::ImageRgba8(imageops::crop_imm(&rgba, x, y, width, height).to_image())
        }
        None => {
            log::warn!("attempted to crop a fully transparent image; returning it unchanged");
            image
        }
    }
}

fn opaque_bounds(rgba: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;
    for (x, y, pixel) in rgba.enumerate_pixels() {
        if pixel[3] > 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}
