const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Strip the NUL-byte padding some upstreams append to image payloads.
/// Interior bytes are never altered: a payload the decoder cannot handle
/// after trimming fails downstream instead of being repaired here.
pub fn sanitize_payload(data: &[u8]) -> &[u8] {
    if data.is_empty() {
        log::warn!("sanitizer received an empty payload");
        return data;
    }
    if !data.contains(&0) {
        return data;
    }
    if data.starts_with(&PNG_SIGNATURE) {
        // NUL bytes are intrinsic to PNG chunk data.
        return data;
    }
    if data.starts_with(&JPEG_SOI) {
        let trimmed = trim_trailing_nuls(data);
        if trimmed.len() < data.len() {
            log::debug!("stripped {} trailing NUL bytes from jpeg payload", data.len() - trimmed.len());
        }
        return trimmed;
    }
    let trimmed = trim_trailing_nuls(data);
    if trimmed.len() == data.len() {
        log::warn!("payload of unknown format has interior NUL bytes and no trailing padding; leaving it to the decoder");
    } else {
        log::debug!("stripped {} trailing NUL bytes from unknown-format payload", data.len() - trimmed.len());
    }
    trimmed
}

fn trim_trailing_nuls(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|b| *b != 0).map(|i| i + 1).unwrap_or(0);
    &data[..end]
}
