#[cfg(test)]
mod tests {
    use crate::routes::{router, AppState};
    use amp_common::{Error, GenerationParams, Message, Result};
    use amp_config::{AppConfig, ModelCatalog};
    use amp_orchestrator::Orchestrator;
    use amp_runtime::{Completion, Evictable, LaunchOptions, TextEngine};
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Echoes the last message back, prefixed
    struct EchoEngine {
        loaded: Option<String>,
    }

    #[async_trait]
    impl Evictable for EchoEngine {
        async fn unload(&mut self) -> Result<()> {
            self.loaded = None;
            Ok(())
        }

        fn is_loaded(&self) -> bool {
            self.loaded.is_some()
        }
    }

    #[async_trait]
    impl TextEngine for EchoEngine {
        async fn ensure_model(&mut self, model_id: &str, _options: &LaunchOptions) -> Result<()> {
            self.loaded = Some(model_id.to_string());
            Ok(())
        }

        fn loaded_model(&self) -> Option<&str> {
            self.loaded.as_deref()
        }

        async fn generate(&self, messages: &[Message], _params: &GenerationParams) -> Result<Completion> {
            let model = self.loaded.clone().ok_or(Error::EngineUnavailable)?;
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
            Ok(Completion {
                text: format!("echo {}", last),
                model,
            })
        }
    }

    fn app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-model.gguf"), b"").unwrap();
        std::fs::write(dir.path().join("b-model.gguf"), b"").unwrap();

        let mut config = AppConfig::default();
        config.completions.stream_chunk_delay_ms = 0;
        let catalog = ModelCatalog::new(dir.path(), "gguf");
        let orchestrator = Orchestrator::builder(config, catalog, EchoEngine { loaded: None }).build();

        (router(AppState::new(Arc::new(orchestrator))), dir)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_conversation_routes() {
        let (app, _dir) = app();

        let (status, body) = send_json(
            &app,
            post_json("/add_system_message", json!({"conversation_id": "c1", "message": "You end replies with meep"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": true, "response": null}));

        let (status, body) = send_json(
            &app,
            post_json("/generate_response", json!({"conversation_id": "c1", "message": "hi", "max_tokens": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"result": true, "response": "echo hi"}));
    }

    #[tokio::test]
    async fn test_generate_response_failure_envelope() {
        let (app, _dir) = app();

        let (status, body) = send_json(&app, post_json("/generate_response", json!({"conversation_id": "c1"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], false);
        assert_eq!(body["response"], "Invalid request: Missing message in the request.");
    }

    #[tokio::test]
    async fn test_models_and_model_info() {
        let (app, _dir) = app();

        let (_, body) = send_json(&app, get("/get_available_models")).await;
        assert_eq!(body, json!({"result": true, "response": ["a-model.gguf", "b-model.gguf"]}));

        let (_, body) = send_json(&app, get("/get_model_info?conversation_id=abc")).await;
        assert_eq!(body, json!({"result": true, "info": {"path": "a-model.gguf"}}));

        let (_, body) = send_json(&app, get("/get_model_info")).await;
        assert_eq!(body["result"], false);
    }

    #[tokio::test]
    async fn test_chat_completion_json() {
        let (app, _dir) = app();

        let (status, body) = send_json(
            &app,
            post_json(
                "/v1/chat/completions",
                json!({
                    "model": "unknown-model",
                    "messages": [{"role": "user", "content": "hello there"}]
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["model"], "a-model.gguf");
        assert_eq!(body["choices"][0]["message"]["role"], "assistant");
        assert_eq!(body["choices"][0]["message"]["content"], "echo hello there");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"], json!({"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}));
    }

    #[tokio::test]
    async fn test_chat_completion_stream() {
        let (app, _dir) = app();

        let request = post_json(
            "/v1/chat/completions",
            json!({"model": "b-model.gguf", "messages": [{"role": "user", "content": "world"}], "stream": true}),
        );
        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        let frames: Vec<&str> = text.split_terminator("\n\n").collect();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], "data: [DONE]");
        let first: Value = serde_json::from_str(frames[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["choices"][0]["delta"]["content"], "echo ");
        assert_eq!(first["model"], "b-model.gguf");
    }

    #[tokio::test]
    async fn test_chat_completion_error_body() {
        let (app, _dir) = app();

        let (status, body) =
            send_json(&app, post_json("/v1/chat/completions", json!({"messages": []}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request");
        assert_eq!(body["error"]["code"], 400);
        assert_eq!(body["error"]["message"], "Invalid request: Messages array cannot be empty");
    }

    #[tokio::test]
    async fn test_speech_to_text_multipart() {
        let (app, _dir) = app();
        let boundary = "amp-test-boundary";

        let multipart = |filename: &str| {
            let body = format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\nRIFF\r\n--{b}\r\nContent-Disposition: form-data; name=\"srt_mode\"\r\n\r\nTrue\r\n--{b}--\r\n",
                b = boundary,
                f = filename
            );
            Request::builder()
                .method("POST")
                .uri("/speech_to_text")
                .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
                .body(Body::from(body))
                .unwrap()
        };

        let (_, body) = send_json(&app, multipart("notes.txt")).await;
        assert_eq!(body, json!({"result": false, "response": "Invalid request: Invalid file type"}));

        let (_, body) = send_json(&app, multipart("clip.wav")).await;
        assert_eq!(body["result"], false);
        assert_eq!(body["response"], "Backend unavailable: No transcription backend is configured");
    }

    #[tokio::test]
    async fn test_generate_image_without_backend() {
        let (app, _dir) = app();

        let (status, body) = send_json(
            &app,
            post_json("/generate_image", json!({"prompt": "a lighthouse", "width": 512, "height": 512})),
        )
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["result"], false);
    }

    #[tokio::test]
    async fn test_health_reports_loaded_model() {
        let (app, _dir) = app();

        let (status, body) = send_json(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["model_loaded"], Value::Null);

        send(&app, post_json("/generate_response", json!({"conversation_id": "c1", "message": "hi"}))).await;

        let (_, body) = send_json(&app, get("/health")).await;
        assert_eq!(body["model_loaded"], "a-model.gguf");
    }
}
