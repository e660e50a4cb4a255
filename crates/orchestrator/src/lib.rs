mod completions;
mod conversation;
mod orchestrator;


pub use completions::{completion_stream, ChatCompletion, CompletionStream, DONE_MARKER};
pub use conversation::Conversation;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
