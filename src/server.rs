//! HTTP front end.
//!
//! Endpoints:
//! - GET  /health          - liveness
//! - GET  /status          - loaded assets and inference pool counters
//! - GET  /voices          - voice names
//! - POST /synthesize      - JSON response with base64 WAV
//! - POST /synthesize/wav  - raw `audio/wav`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine as _;
use serde::Serialize;

use crate::error::{ErrorKind, SynthesisError};
use crate::synthesis::{SynthesisOutput, SynthesisRequest, Synthesizer};

/// Seconds a client is asked to wait after an overload response.
const RETRY_AFTER_SECS: &str = "1";

#[derive(Debug, Serialize)]
pub struct SynthesisResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Base64-encoded WAV file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

#[derive(Debug, Serialize)]
struct VoicesResponse<'a> {
    voices: Vec<&'a str>,
}

/// Build the router over a shared synthesizer.
pub fn router(synth: Arc<Synthesizer>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/voices", get(list_voices))
        .route("/synthesize", post(synthesize_json))
        .route("/synthesize/wav", post(synthesize_wav))
        .with_state(synth)
}

/// Serve until Ctrl-C.
pub async fn serve(synth: Arc<Synthesizer>, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(synth))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down");
            }
        })
        .await
}

/// HTTP status for a failed request.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Tokenize => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Overload => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Inference | ErrorKind::Encoding => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "Kokoro TTS",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_status(State(synth): State<Arc<Synthesizer>>) -> Json<serde_json::Value> {
    let assets = synth.assets();
    Json(serde_json::json!({
        "initialized": true,
        "voices_loaded": assets.voices().len(),
        "languages": assets.tokenizer().languages(),
        "default_voice": synth.default_voice(),
        "default_language": synth.default_language(),
        "sample_rate": synth.output_sample_rate(),
        "model_file": assets.model_handle().path().display().to_string(),
        "speed_stage": synth.config().speed_stage,
        "inference": synth.engine_stats(),
    }))
}

async fn list_voices(State(synth): State<Arc<Synthesizer>>) -> Response {
    Json(VoicesResponse {
        voices: synth.list_voices(),
    })
    .into_response()
}

async fn synthesize_json(
    State(synth): State<Arc<Synthesizer>>,
    Json(request): Json<SynthesisRequest>,
) -> Response {
    match run(synth, request).await {
        Ok(output) => {
            let response = SynthesisResponse {
                success: true,
                message: format!(
                    "Synthesized {:.2}s with voice '{}'",
                    output.duration_secs(),
                    output.voice
                ),
                sample_rate: Some(output.sample_rate),
                audio: Some(base64::engine::general_purpose::STANDARD.encode(output.wav.as_bytes())),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(failure) => {
            let response = SynthesisResponse {
                success: false,
                message: failure.message.clone(),
                sample_rate: None,
                audio: None,
            };
            failure.with_body(Json(response))
        }
    }
}

async fn synthesize_wav(
    State(synth): State<Arc<Synthesizer>>,
    Json(request): Json<SynthesisRequest>,
) -> Response {
    match run(synth, request).await {
        Ok(output) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "audio/wav"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"speech.wav\"",
                ),
            ],
            output.wav.into_vec(),
        )
            .into_response(),
        Err(failure) => {
            let message = failure.message.clone();
            failure.with_body(message)
        }
    }
}

struct Failure {
    status: StatusCode,
    retry_after: bool,
    message: String,
}

impl Failure {
    fn with_body(self, body: impl IntoResponse) -> Response {
        let mut response = (self.status, body).into_response();
        if self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        response
    }
}

impl From<SynthesisError> for Failure {
    fn from(err: SynthesisError) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            retry_after: kind == ErrorKind::Overload,
            message: err.to_string(),
        }
    }
}

/// Run one request on the blocking pool so inference never stalls the runtime.
async fn run(synth: Arc<Synthesizer>, request: SynthesisRequest) -> Result<SynthesisOutput, Failure> {
    match tokio::task::spawn_blocking(move || synth.synthesize(&request)).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            log::warn!("Synthesis failed at {}: {err}", err.stage());
            Err(err.into())
        }
        Err(join) => {
            log::error!("Synthesis task aborted: {join}");
            Err(Failure {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                retry_after: false,
                message: "synthesis task aborted".to_string(),
            })
        }
    }
}
