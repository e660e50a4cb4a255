use amp_common::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, DeltaContent, FinishReason,
    ResponseMessage, Role, StreamChoice, Usage,
};
use futures::stream::Stream;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::error;
use uuid::Uuid;

/// Terminal payload of a completion stream
pub const DONE_MARKER: &str = "[DONE]";

/// Server-sent-event payloads: chunk JSON, then [`DONE_MARKER`]
pub type CompletionStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Result of the OpenAI-compatible completion shim
pub enum ChatCompletion {
    Complete(ChatCompletionResponse),
    Stream(CompletionStream),
}

impl std::fmt::Debug for ChatCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatCompletion::Complete(response) => {
                f.debug_tuple("Complete").field(response).finish()
            }
            ChatCompletion::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

/// Aggregate completion object with approximate word-count usage
pub fn completion_response<'a>(
    model: &str,
    prompt: impl IntoIterator<Item = &'a str>,
    text: String,
) -> ChatCompletionResponse {
    let usage = Usage::approximate(prompt, &text);
    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            message: ResponseMessage {
                role: Role::Assistant,
                content: text,
            },
            finish_reason: Some(FinishReason::Stop),
            index: 0,
        }],
        usage,
    }
}

/// Replay finished completion text as a simulated token stream.
///
/// Each whitespace-delimited word becomes one delta chunk carrying a
/// trailing space, followed by the `[DONE]` marker.
pub fn completion_stream(model: String, text: String, delay: Duration) -> CompletionStream {
    let id = completion_id();
    let created = unix_timestamp();

    Box::pin(async_stream::stream! {
        for token in text.split_whitespace() {
            let chunk = ChatCompletionChunk {
                id: id.clone(),
                object: "chat.completion.chunk".to_string(),
                created,
                model: model.clone(),
                choices: vec![StreamChoice {
                    index: 0,
                    delta: DeltaContent {
                        role: None,
                        content: Some(format!("{} ", token)),
                    },
                    finish_reason: None,
                }],
            };

            match serde_json::to_string(&chunk) {
                Ok(json) => yield json,
                Err(e) => error!("Failed to serialize completion chunk: {}", e),
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        yield DONE_MARKER.to_string();
    })
}
