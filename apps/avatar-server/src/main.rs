use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use avatar_config::ServiceConfig;
use avatar_core::{AvatarError, CircuitBreaker, TelemetrySink};
use avatar_fetch::{ResilientFetcher, RetryPolicy};
use avatar_image::{combine_with_telemetry, encode_png, CombineRequest};
use avatar_telemetry::sink_from_env;
use serde_json::{json, Value};
use tiny_http::{Header, Method, Request, Response, Server};

const SERVICE_NAME: &str = "matchup-avatar";

struct Headers {
    json: Header,
    png: Header,
}

fn main() -> Result<()> {
    env_logger::init();
    let config = ServiceConfig::from_env()?;
    let fetcher = ResilientFetcher::new(RetryPolicy {
        max_retries: config.max_retries,
        base_delay: Duration::from_millis(config.base_delay_ms),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    })?;
    let breaker = Arc::new(CircuitBreaker::new(
        config.failure_threshold,
        Duration::from_secs(config.recovery_timeout_secs),
    ));
    let telemetry = sink_from_env();
    let headers = Headers {
        json: header("Content-Type", "application/json")?,
        png: header("Content-Type", "image/png")?,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let server = Server::http(&addr).map_err(|err| anyhow!("failed to bind {}: {}", addr, err))?;
    log::info!("{} listening on {}", SERVICE_NAME, addr);

    for mut request in server.incoming_requests() {
        let response = route(
            &mut request,
            &config,
            &fetcher,
            &breaker,
            telemetry.as_ref().map(|sink| sink.as_ref()),
            &headers,
        );
        if let Err(err) = request.respond(response) {
            log::warn!("failed to send response: {}", err);
        }
    }
    Ok(())
}

fn route(
    request: &mut Request,
    config: &ServiceConfig,
    fetcher: &ResilientFetcher,
    breaker: &CircuitBreaker,
    telemetry: Option<&dyn TelemetrySink>,
    headers: &Headers,
) -> Response<Cursor<Vec<u8>>> {
    match (request.method(), request.url()) {
        (Method::Get, "/health") => json_response(200, health_body(), &headers.json),
        (Method::Post, "/create_avatar") => {
            let mut body = Vec::new();
            if let Err(err) = request.as_reader().read_to_end(&mut body) {
                log::warn!("failed to read request body: {}", err);
                return json_response(400, json!({ "error": "failed to read request body" }), &headers.json);
            }
            match create_avatar(&body, config, fetcher, breaker, telemetry) {
                Ok(png) => Response::from_data(png).with_status_code(200).with_header(headers.png.clone()),
                Err(err) => {
                    log::error!("create_avatar failed: {}", err);
                    error_response(&err, &headers.json)
                }
            }
        }
        _ => json_response(404, json!({ "error": "not found" }), &headers.json),
    }
}

fn create_avatar(
    body: &[u8],
    config: &ServiceConfig,
    fetcher: &ResilientFetcher,
    breaker: &CircuitBreaker,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<Vec<u8>, AvatarError> {
    let (team1, team2) = parse_team_ids(body)?;
    log::info!("creating avatar for team ids {} and {}", team1, team2);

    let request = CombineRequest {
        logo_url_1: config.logo_url(&team1),
        logo_url_2: config.logo_url(&team2),
        background: config.resolve_background(),
    };
    let canvas = combine_with_telemetry(fetcher, &request, breaker, telemetry)?;
    encode_png(&canvas)
}

// Both ids are required; JSON strings and numbers are accepted.
fn parse_team_ids(body: &[u8]) -> Result<(String, String), AvatarError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| AvatarError::validation(format!("request body is not valid JSON: {}", err)))?;
    let team1 = coerce_id(&value, "team1_id")?;
    let team2 = coerce_id(&value, "team2_id")?;
    Ok((team1, team2))
}

fn coerce_id(value: &Value, field: &str) -> Result<String, AvatarError> {
    match value.get(field) {
        Some(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(AvatarError::validation(format!(
            "missing or invalid {} in request body",
            field
        ))),
    }
}

fn status_for(err: &AvatarError) -> u16 {
    match err {
        AvatarError::Validation(_) => 400,
        AvatarError::Download { timed_out: true, .. } => 504,
        AvatarError::Download { .. } => 502,
        AvatarError::Processing(_) | AvatarError::Configuration(_) | AvatarError::CircuitOpen => 500,
    }
}

fn error_response(err: &AvatarError, json_header: &Header) -> Response<Cursor<Vec<u8>>> {
    let info = err.as_error_info();
    let mut body = json!({ "error": info.message, "code": info.code });
    if !info.context.is_empty() {
        body["details"] = json!(info.context);
    }
    json_response(status_for(err), body, json_header)
}

fn health_body() -> Value {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": timestamp,
    })
}

fn json_response(status: u16, body: Value, json_header: &Header) -> Response<Cursor<Vec<u8>>> {
    Response::from_data(body.to_string().into_bytes())
        .with_status_code(status)
        .with_header(json_header.clone())
}

fn header(name: &str, value: &str) -> Result<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes())
        .map_err(|_| anyhow!("invalid header {}: {}", name, value))
}
