use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use media_downloader::{
    Media, MediaError, MediaService, Source, YtDlp,
    config::{self, DEFAULT_CONFIG_PATH},
};
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,media_downloader=debug";

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve media format listings and downloads.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Override the listen address")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Override the listen port")]
    port: Option<u16>,
    #[arg(
        long = "ytdlp",
        value_name = "PATH",
        help = "Path to the yt-dlp executable"
    )]
    ytdlp: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    service: Arc<MediaService>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(err: MediaError) -> Self {
        match &err {
            MediaError::UnsupportedSource(_) => Self::bad_request(err.to_string()),
            MediaError::FormatNotFound(_) => Self::not_found(err.to_string()),
            MediaError::Extraction(_) | MediaError::Stream(_) => {
                warn!(error = %err, "request failed");
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct FormatsQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadQuery {
    url: Option<String>,
    source: Option<String>,
    source_identifier: Option<String>,
    container: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = config::load_service_config_from(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(ytdlp) = cli.ytdlp {
        settings.ytdlp_path = ytdlp;
    }

    match YtDlp::new(settings.ytdlp_path.clone()).version().await {
        Ok(version) => info!(%version, path = %settings.ytdlp_path.display(), "found yt-dlp"),
        Err(err) => warn!(error = %err, "yt-dlp is not usable; extractions will fail"),
    }

    let service = Arc::new(MediaService::from_config(&settings));
    let app = router(AppState {
        service: service.clone(),
    });

    let listener = tokio::net::TcpListener::bind((settings.host.as_str(), settings.port))
        .await
        .with_context(|| format!("binding to {}:{}", settings.host, settings.port))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    service.cache().shutdown();
    info!("API server stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/formats", get(list_formats))
        .route("/api/download", get(download))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_formats(
    State(state): State<AppState>,
    Query(query): Query<FormatsQuery>,
) -> ApiResult<Json<Media>> {
    let url = required(query.url, "url")?;
    let media = state.service.list_formats(&url).await?;
    Ok(Json(media))
}

async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let url = required(query.url, "url")?;
    let source = required(query.source, "source")?;
    let identifier = required(query.source_identifier, "source_identifier")?;

    let source = source
        .parse::<u8>()
        .map(Source::from_id)
        .map_err(|_| ApiError::bad_request(format!("invalid source: {source}")))?;
    if source != Source::classify(&url) {
        return Err(ApiError::bad_request(format!(
            "source {source} does not match {url}"
        )));
    }

    let resolved = state.service.resolve_format(&url, &identifier).await?;
    if let Some(container) = query.container.filter(|value| !value.is_empty())
        && container != resolved.format.extension
    {
        return Err(ApiError::bad_request(format!(
            "format {identifier} is {}, not {container}",
            resolved.format.extension
        )));
    }
    let download = resolved.open().await?;

    let mime = MimeGuess::from_ext(&download.format.extension).first_or_octet_stream();
    let disposition = content_disposition(&download.filename());
    let mut response = Body::from_stream(download.stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = mime.to_string().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = disposition.parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing query parameter: {name}")))
}

/// `attachment` disposition with an ASCII fallback name and the exact name
/// as an RFC 5987 `filename*` parameter.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    if fallback == filename {
        return format!("attachment; filename=\"{filename}\"");
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for byte in filename.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
