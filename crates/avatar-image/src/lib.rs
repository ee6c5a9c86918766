pub mod compose;
pub mod crop;
pub mod decode;
pub mod fallback;
pub mod sanitize;

pub use compose::{combine_logos, combine_with_telemetry, canvas_spec, encode_png, CanvasSpec, CombineRequest};
pub use crop::crop_transparent_border;
pub use decode::decode_rgba;
pub use fallback::{derive_team_color, fallback_logo, FALLBACK_LOGO_SIZE};
pub use sanitize::sanitize_payload;
