use std::path::{Path, PathBuf};

use avatar_core::AvatarError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://staticcdn.svenskfotboll.se/img/teams";
pub const DEFAULT_BACKGROUND_FILENAME: &str = "grass_turf.jpg";
pub const DEFAULT_PORT: u16 = 5002;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub background: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            base_url: DEFAULT_BASE_URL.to_string(),
            background: None,
            assets_dir: None,
            max_retries: 3,
            base_delay_ms: 1_000,
            request_timeout_secs: 10,
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, AvatarError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the config from a key lookup, layering overrides on the
    /// defaults. Split out from [`ServiceConfig::from_env`] so tests can feed
    /// a map instead of mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AvatarError> {
        let mut cfg = Self::default();
        if let Some(host) = non_empty(lookup("AVATAR_HOST")) {
            cfg.host = host;
        }
        if let Some(port) = non_empty(lookup("AVATAR_PORT")) {
            cfg.port = parse_env("AVATAR_PORT", &port)?;
        }
        if let Some(base_url) = non_empty(lookup("AVATAR_BASE_URL")) {
            cfg.base_url = base_url;
        }
        if let Some(background) = non_empty(lookup("AVATAR_BACKGROUND")) {
            cfg.background = Some(PathBuf::from(background));
        }
        if let Some(assets_dir) = non_empty(lookup("AVATAR_ASSETS_DIR")) {
            cfg.assets_dir = Some(PathBuf::from(assets_dir));
        }
        if let Some(retries) = non_empty(lookup("AVATAR_MAX_RETRIES")) {
            cfg.max_retries = parse_env("AVATAR_MAX_RETRIES", &retries)?;
        }
        if let Some(delay) = non_empty(lookup("AVATAR_BASE_DELAY_MS")) {
            cfg.base_delay_ms = parse_env("AVATAR_BASE_DELAY_MS", &delay)?;
        }
        if let Some(timeout) = non_empty(lookup("AVATAR_TIMEOUT_SECS")) {
            cfg.request_timeout_secs = parse_env("AVATAR_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(threshold) = non_empty(lookup("AVATAR_FAILURE_THRESHOLD")) {
            cfg.failure_threshold = parse_env("AVATAR_FAILURE_THRESHOLD", &threshold)?;
        }
        if let Some(recovery) = non_empty(lookup("AVATAR_RECOVERY_SECS")) {
            cfg.recovery_timeout_secs = parse_env("AVATAR_RECOVERY_SECS", &recovery)?;
        }
        if let Some(background) = &cfg.background {
            validate_background_path(background)?;
        }
        Ok(cfg)
    }

    /// Background path used when a request does not carry an explicit one:
    /// configured path first, otherwise `grass_turf.jpg` under the assets
    /// directory.
    pub fn resolve_background(&self) -> Option<PathBuf> {
        if let Some(background) = &self.background {
            return Some(background.clone());
        }
        self.resolve_assets_dir().map(|dir| dir.join(DEFAULT_BACKGROUND_FILENAME))
    }

    fn resolve_assets_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.assets_dir {
            return Some(dir.clone());
        }
        default_assets_dir()
    }

    pub fn logo_url(&self, team_id: &str) -> String {
        logo_url(&self.base_url, team_id)
    }
}

pub fn default_assets_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".avatar").join("assets"))
}

pub fn logo_url(base_url: &str, team_id: &str) -> String {
    format!("{}/{}.png", base_url.trim_end_matches('/'), team_id.trim())
}

/// The background is optional at runtime, but a configured path with an
/// extension the decoder cannot handle is a static setup mistake.
pub fn validate_background_path(path: &Path) -> Result<(), AvatarError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" => Ok(()),
        _ => Err(AvatarError::configuration(format!(
            "unsupported background image extension for {}",
            path.display()
        ))),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, AvatarError> {
    raw.trim()
        .parse()
        .map_err(|_| AvatarError::configuration(format!("invalid {}: {}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let cfg = ServiceConfig::from_lookup(|_| None).expect("defaults resolve");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.request_timeout_secs, 10);
    }

    #[test]
    fn overrides_replace_defaults() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[
            ("AVATAR_PORT", "8080"),
            ("AVATAR_BASE_URL", "https://cdn.example.com/logos/"),
            ("AVATAR_MAX_RETRIES", "5"),
        ]))
        .expect("overrides resolve");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.logo_url("42"), "https://cdn.example.com/logos/42.png");
    }

    #[test]
    fn invalid_port_is_a_configuration_error() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("AVATAR_PORT", "not-a-port")]))
            .expect_err("bad port rejected");
        assert!(matches!(err, AvatarError::Configuration(_)));
    }

    #[test]
    fn configured_background_with_bad_extension_is_rejected() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("AVATAR_BACKGROUND", "/srv/assets/turf.bmp")]))
            .expect_err("bmp background rejected");
        assert!(matches!(err, AvatarError::Configuration(_)));
    }

    #[test]
    fn explicit_background_wins_over_assets_dir() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[
            ("AVATAR_BACKGROUND", "/srv/assets/turf.jpg"),
            ("AVATAR_ASSETS_DIR", "/srv/other"),
        ]))
        .expect("config resolves");
        assert_eq!(cfg.resolve_background(), Some(PathBuf::from("/srv/assets/turf.jpg")));
    }

    #[test]
    fn assets_dir_supplies_default_background_filename() {
        let cfg = ServiceConfig::from_lookup(lookup_from(&[("AVATAR_ASSETS_DIR", "/srv/assets")]))
            .expect("config resolves");
        assert_eq!(
            cfg.resolve_background(),
            Some(PathBuf::from("/srv/assets").join(DEFAULT_BACKGROUND_FILENAME))
        );
    }

    #[test]
    fn logo_url_trims_trailing_slash_and_whitespace() {
        assert_eq!(logo_url("https://cdn.example.com/teams/", " 7 "), "https://cdn.example.com/teams/7.png");
    }
}
