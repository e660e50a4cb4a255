use amp_common::{
    ChatCompletionRequest, Error, ErrorDetail, ErrorResponse, GenerateRequest, HealthResponse,
    HealthStatus, ImageRequest, MessageRequest, Outcome, SpeechRequest,
    TranscriptionRequest,
};
use amp_orchestrator::{ChatCompletion, Orchestrator};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::SystemTime;

const UPLOAD_LIMIT_BYTES: usize = 256 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    start_time: SystemTime,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            start_time: SystemTime::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/add_system_message", post(add_system_message))
        .route("/add_user_message", post(add_user_message))
        .route("/add_assistant_message", post(add_assistant_message))
        .route("/generate_response", post(generate_response))
        .route("/get_available_models", get(get_available_models))
        .route("/get_model_info", get(get_model_info))
        .route("/v1/chat/completions", post(chat_completions))
        .route(
            "/speech_to_text",
            post(speech_to_text).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route(
            "/text_to_speech",
            post(text_to_speech).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/generate_image", post(generate_image))
        .route("/health", get(health_check))
        .with_state(state)
}

fn status_of(detail: &ErrorDetail) -> StatusCode {
    StatusCode::from_u16(detail.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn invalid<T>(message: impl Into<String>) -> Outcome<T> {
    Outcome::failure(&Error::InvalidRequest(message.into()))
}

async fn add_system_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Json<Outcome<()>> {
    Json(state.orchestrator.add_system_message(&request).await)
}

async fn add_user_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Json<Outcome<()>> {
    Json(state.orchestrator.add_user_message(&request).await)
}

async fn add_assistant_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Json<Outcome<()>> {
    Json(state.orchestrator.add_assistant_message(&request).await)
}

async fn generate_response(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Json<Outcome<String>> {
    Json(state.orchestrator.generate_response(&request).await)
}

async fn get_available_models(State(state): State<AppState>) -> Json<Outcome<Vec<String>>> {
    Json(state.orchestrator.available_models().await)
}

#[derive(Debug, Deserialize)]
struct ModelInfoQuery {
    conversation_id: Option<String>,
}

/// Replies `{"result": bool, "info": ...}`
async fn get_model_info(
    State(state): State<AppState>,
    Query(query): Query<ModelInfoQuery>,
) -> Json<Value> {
    let body = match state.orchestrator.model_info(query.conversation_id.as_deref()).await {
        Outcome::Success(info) => json!({"result": true, "info": info}),
        Outcome::Failure(detail) => json!({"result": false, "info": detail.message}),
    };
    Json(body)
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    match state.orchestrator.chat_completions(request).await {
        Outcome::Success(ChatCompletion::Complete(response)) => Json(response).into_response(),
        Outcome::Success(ChatCompletion::Stream(stream)) => {
            let events = stream.map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
            Sse::new(events).into_response()
        }
        Outcome::Failure(detail) => {
            (status_of(&detail), Json(ErrorResponse::from(detail))).into_response()
        }
    }
}

async fn speech_to_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Json<Outcome<String>> {
    let request = match read_transcription(multipart).await {
        Ok(request) => request,
        Err(outcome) => return Json(outcome),
    };
    Json(state.orchestrator.speech_to_text(&request).await)
}

async fn read_transcription(
    mut multipart: Multipart,
) -> Result<TranscriptionRequest, Outcome<String>> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut srt_mode = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| invalid(format!("Failed reading multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| invalid(format!("Failed reading uploaded file: {}", e)))?;
                file = Some((filename, bytes.to_vec()));
            }
            "srt_mode" => {
                let text = field.text().await.unwrap_or_default();
                srt_mode = text.trim().eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }

    let (filename, audio) = file.ok_or_else(|| invalid("No file part"))?;
    Ok(TranscriptionRequest {
        filename,
        audio,
        srt_mode,
    })
}

/// Multipart form: `text`, plus an optional `voice` sample to clone
async fn text_to_speech(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Json<Outcome<Vec<String>>> {
    let mut request = SpeechRequest::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Json(invalid(format!("Failed reading multipart field: {}", e))),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => request.text = field.text().await.unwrap_or_default(),
            "voice" => match field.bytes().await {
                Ok(bytes) if !bytes.is_empty() => request.voice_sample = Some(bytes.to_vec()),
                Ok(_) => {}
                Err(e) => return Json(invalid(format!("Failed reading voice sample: {}", e))),
            },
            _ => {}
        }
    }

    let clips = state.orchestrator.text_to_speech(&request).await;
    Json(clips.map(|clips| {
        clips
            .iter()
            .map(|clip| base64::engine::general_purpose::STANDARD.encode(clip))
            .collect()
    }))
}

async fn generate_image(
    State(state): State<AppState>,
    Json(request): Json<ImageRequest>,
) -> Response {
    match state.orchestrator.generate_image(&request).await {
        Outcome::Success(image) => ([(header::CONTENT_TYPE, "image/png")], image).into_response(),
        Outcome::Failure(detail) => {
            let status = status_of(&detail);
            (status, Json(Outcome::<()>::Failure(detail))).into_response()
        }
    }
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().unwrap_or_default().as_secs();

    Json(HealthResponse {
        status: HealthStatus::Healthy,
        model_loaded: state.orchestrator.loaded_model().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
    })
}
