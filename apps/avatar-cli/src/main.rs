use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use avatar_config::ServiceConfig;
use avatar_core::CircuitBreaker;
use avatar_fetch::{ResilientFetcher, RetryPolicy};
use avatar_image::{combine_with_telemetry, CombineRequest};
use avatar_telemetry::sink_from_env;
use clap::Parser;
use image::RgbaImage;

#[derive(Parser, Debug)]
#[command(
    name = "avatar",
    version,
    about = "Merge two team logos side-by-side into a square matchup avatar"
)]
struct Cli {
    /// ID of the first team.
    team_id1: String,
    /// ID of the second team.
    team_id2: String,
    /// Where to save the combined image. JPEG targets are flattened to RGB.
    #[arg(long, short = 'o', default_value = "combined_logos.png")]
    output: PathBuf,
    /// Background image path; defaults to grass_turf.jpg under the assets directory.
    #[arg(long, short = 'b')]
    background: Option<PathBuf>,
    /// CDN base URL the logos are fetched from.
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    #[arg(long, default_value_t = 1_000)]
    base_delay_ms: u64,
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env()?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }

    let url1 = config.logo_url(&cli.team_id1);
    let url2 = config.logo_url(&cli.team_id2);
    log::info!("merging logos for team {} and team {}", cli.team_id1, cli.team_id2);

    let fetcher = ResilientFetcher::new(RetryPolicy {
        max_retries: cli.max_retries,
        base_delay: Duration::from_millis(cli.base_delay_ms),
        request_timeout: Duration::from_secs(cli.timeout_secs),
    })?;
    let breaker = CircuitBreaker::default();
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());

    let request = CombineRequest {
        logo_url_1: url1.clone(),
        logo_url_2: url2.clone(),
        background: cli.background.clone().or_else(|| config.resolve_background()),
    };

    let start = Instant::now();
    let canvas = combine_with_telemetry(&fetcher, &request, &breaker, telemetry_ref)?;
    save_canvas(&canvas, &cli.output)?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "output": cli.output,
            "canvasSize": canvas.width(),
            "team1Url": url1,
            "team2Url": url2,
            "elapsedMs": start.elapsed().as_millis() as u64,
        }))?
    );
    Ok(())
}

fn save_canvas(canvas: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory {}", parent.display()))?;
        }
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if matches!(ext.as_str(), "jpg" | "jpeg") {
        // JPEG has no alpha channel.
        let rgb = image::DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
        rgb.save(path).with_context(|| format!("saving {}", path.display()))?;
    } else {
        canvas.save(path).with_context(|| format!("saving {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_output_keeps_alpha() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.png");
        let canvas = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));

        save_canvas(&canvas, &path).expect("png saves");
        let reloaded = image::open(&path).expect("png reopens").to_rgba8();
        assert_eq!(reloaded.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn jpeg_output_is_flattened_to_rgb() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.jpg");
        let canvas = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));

        save_canvas(&canvas, &path).expect("jpeg saves");
        let reloaded = image::open(&path).expect("jpeg reopens");
        assert!(!reloaded.color().has_alpha());
    }
}
