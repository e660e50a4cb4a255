use amp_common::{Message, Role};
use serde::Serialize;

// Mistral token ids
const MISTRAL_BOS: u32 = 1;
const MISTRAL_EOS: u32 = 2;

// End-of-turn markers that leak into completions, per family
const CHATML_MARKERS: &[&str] = &["<|im_end|>", "<|im_start|>"];
const LLAMA3_MARKERS: &[&str] = &["<|eot_id|>", "<|end_of_text|>", "<|start_header_id|>"];
const MISTRAL_MARKERS: &[&str] = &["</s>", "[INST]"];

/// Prompt-formatting strategy, chosen once per loaded model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatterFamily {
    /// ChatML-style role delimiters
    #[default]
    Default,
    Llama3,
    Mistral,
}

/// Prompt sent to the engine's completion endpoint.
///
/// The endpoint accepts either a plain string or an array mixing raw token
/// ids and text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Pieces(Vec<PromptPiece>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PromptPiece {
    Token(u32),
    Text(String),
}

impl Prompt {
    /// Append raw text after the formatted turns
    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self {
            Prompt::Text(prompt) => prompt.push_str(text),
            Prompt::Pieces(pieces) => pieces.push(PromptPiece::Text(text.to_string())),
        }
    }
}

impl FormatterFamily {
    /// Pick the family for a model identifier by substring match
    pub fn classify(model_id: &str) -> Self {
        let id = model_id.to_lowercase();
        if id.contains("llama-3") || id.contains("llama3") {
            FormatterFamily::Llama3
        } else if id.contains("mistral") {
            FormatterFamily::Mistral
        } else {
            FormatterFamily::Default
        }
    }

    /// Format messages into a prompt ending in an open assistant turn
    pub fn format(self, messages: &[Message]) -> Prompt {
        match self {
            FormatterFamily::Default => Prompt::Text(Self::format_chatml(messages)),
            FormatterFamily::Llama3 => Prompt::Text(Self::format_llama3(messages)),
            FormatterFamily::Mistral => Prompt::Pieces(Self::format_mistral(messages)),
        }
    }

    fn format_chatml(messages: &[Message]) -> String {
        let mut prompt = String::with_capacity(1024);
        for message in messages {
            prompt.push_str("<|im_start|>");
            prompt.push_str(message.role.as_str());
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str("<|im_end|>\n");
        }

        let mut prompt = prompt.trim().to_string();
        prompt.push_str("<|im_start|>assistant");
        prompt
    }

    fn format_llama3(messages: &[Message]) -> String {
        let mut prompt = String::with_capacity(1024);

        // Only the latest system message is used, always as the first turn
        if let Some(system) = messages.iter().rev().find(|m| m.role == Role::System) {
            Self::write_llama3_turn(&mut prompt, "system", &system.content);
        }

        for message in messages {
            match message.role {
                Role::User => Self::write_llama3_turn(&mut prompt, "user", &message.content),
                Role::Assistant => {
                    Self::write_llama3_turn(&mut prompt, "assistant", &message.content)
                }
                Role::System => {}
            }
        }

        prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
        prompt
    }

    fn write_llama3_turn(prompt: &mut String, role: &str, content: &str) {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(role);
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(content);
        prompt.push_str("<|eot_id|>");
    }

    /// Mistral has no system turn: system content is fused into the next
    /// user instruction, and the latest system message into the final one.
    fn format_mistral(messages: &[Message]) -> Vec<PromptPiece> {
        let mut pieces = vec![PromptPiece::Token(MISTRAL_BOS)];
        let mut pending_system = "";
        let mut latest_system = "";

        for (i, message) in messages.iter().enumerate() {
            match message.role {
                Role::User => {
                    let system = if i == messages.len() - 1 {
                        latest_system
                    } else {
                        pending_system
                    };
                    pieces.push(PromptPiece::Text(Self::mistral_instruction(
                        system,
                        Some(&message.content),
                    )));
                    pending_system = "";
                }
                Role::Assistant => {
                    pieces.push(PromptPiece::Text(message.content.clone()));
                    pieces.push(PromptPiece::Token(MISTRAL_EOS));
                }
                Role::System => {
                    pending_system = &message.content;
                    latest_system = &message.content;
                }
            }
        }

        // A system message with no user turn after it becomes its own instruction
        if !pending_system.is_empty() {
            pieces.push(PromptPiece::Text(Self::mistral_instruction(pending_system, None)));
        }

        pieces
    }

    fn mistral_instruction(system: &str, user: Option<&str>) -> String {
        let mut body = String::new();
        if !system.is_empty() {
            body.push_str(system);
            body.push_str("\n\n");
        }
        if let Some(user) = user {
            body.push_str(user);
        }
        format!("[INST] {} [/INST]", body)
    }

    /// Markers that end a turn in this family's template
    pub fn end_of_turn_markers(self) -> &'static [&'static str] {
        match self {
            FormatterFamily::Default => CHATML_MARKERS,
            FormatterFamily::Llama3 => LLAMA3_MARKERS,
            FormatterFamily::Mistral => MISTRAL_MARKERS,
        }
    }

    /// Trim a completion and cut it at the first leaked end-of-turn marker.
    ///
    /// Idempotent: clean content passes through unchanged.
    pub fn strip_turn_artifacts(self, content: &str) -> String {
        let trimmed = content.trim();
        let cut = self
            .end_of_turn_markers()
            .iter()
            .filter_map(|marker| trimmed.find(marker))
            .min()
            .unwrap_or(trimmed.len());
        trimmed[..cut].trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            FormatterFamily::classify("Meta-Llama-3-8B-Instruct.Q5_K_M.gguf"),
            FormatterFamily::Llama3
        );
        assert_eq!(
            FormatterFamily::classify("Mistral-7B-Instruct-v0.3.Q4_K_M.gguf"),
            FormatterFamily::Mistral
        );
        assert_eq!(
            FormatterFamily::classify("qwen2-7b-instruct-q4_k_m.gguf"),
            FormatterFamily::Default
        );
    }

    #[test]
    fn test_format_default() {
        let messages = vec![msg(Role::System, "Be concise."), msg(Role::User, "Hello")];

        let prompt = FormatterFamily::Default.format(&messages);

        assert_eq!(
            prompt,
            Prompt::Text(
                "<|im_start|>system\nBe concise.<|im_end|>\n<|im_start|>user\nHello<|im_end|><|im_start|>assistant"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_format_default_empty() {
        assert_eq!(
            FormatterFamily::Default.format(&[]),
            Prompt::Text("<|im_start|>assistant".to_string())
        );
    }

    #[test]
    fn test_format_llama3_puts_latest_system_first() {
        let messages = vec![
            msg(Role::User, "Hello"),
            msg(Role::System, "old rules"),
            msg(Role::Assistant, "Hi!"),
            msg(Role::System, "You end replies with meep"),
            msg(Role::User, "How are you?"),
        ];

        let Prompt::Text(prompt) = FormatterFamily::Llama3.format(&messages) else {
            panic!("Expected text prompt");
        };

        assert!(prompt.starts_with(
            "<|start_header_id|>system<|end_header_id|>\n\nYou end replies with meep<|eot_id|>"
        ));
        assert!(!prompt.contains("old rules"));
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>\n\nHello<|eot_id|>"));
        assert!(prompt.contains("<|start_header_id|>assistant<|end_header_id|>\n\nHi!<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
        assert_eq!(prompt.matches("<|start_header_id|>system").count(), 1);
    }

    #[test]
    fn test_format_mistral_fuses_system_into_user_turn() {
        let messages = vec![
            msg(Role::System, "Be brief."),
            msg(Role::User, "Hello"),
            msg(Role::Assistant, "Hi!"),
            msg(Role::User, "Bye"),
        ];

        let prompt = FormatterFamily::Mistral.format(&messages);

        assert_eq!(
            prompt,
            Prompt::Pieces(vec![
                PromptPiece::Token(1),
                PromptPiece::Text("[INST] Be brief.\n\nHello [/INST]".to_string()),
                PromptPiece::Text("Hi!".to_string()),
                PromptPiece::Token(2),
                PromptPiece::Text("[INST] Be brief.\n\nBye [/INST]".to_string()),
            ])
        );
    }

    #[test]
    fn test_format_mistral_trailing_system() {
        let messages = vec![msg(Role::User, "Hello"), msg(Role::System, "Answer in French.")];

        let prompt = FormatterFamily::Mistral.format(&messages);

        assert_eq!(
            prompt,
            Prompt::Pieces(vec![
                PromptPiece::Token(1),
                PromptPiece::Text("[INST] Hello [/INST]".to_string()),
                PromptPiece::Text("[INST] Answer in French.\n\n [/INST]".to_string()),
            ])
        );
    }

    #[test]
    fn test_prompt_serialization() {
        let pieces = Prompt::Pieces(vec![PromptPiece::Token(1), PromptPiece::Text("hi".into())]);
        assert_eq!(serde_json::to_string(&pieces).unwrap(), r#"[1,"hi"]"#);

        let text = Prompt::Text("hi".into());
        assert_eq!(serde_json::to_string(&text).unwrap(), r#""hi""#);
    }

    #[test]
    fn test_push_text() {
        let mut text = Prompt::Text("abc".into());
        text.push_text("Sure,");
        assert_eq!(text, Prompt::Text("abcSure,".into()));

        let mut pieces = Prompt::Pieces(vec![PromptPiece::Token(1)]);
        pieces.push_text("");
        pieces.push_text("Sure,");
        assert_eq!(
            pieces,
            Prompt::Pieces(vec![PromptPiece::Token(1), PromptPiece::Text("Sure,".into())])
        );
    }

    #[test]
    fn test_strip_turn_artifacts() {
        let family = FormatterFamily::Llama3;

        assert_eq!(family.strip_turn_artifacts("  Hello world<|eot_id|>junk"), "Hello world");
        assert_eq!(
            family.strip_turn_artifacts("Answer.<|eot_id|><|start_header_id|>user"),
            "Answer."
        );
        assert_eq!(family.strip_turn_artifacts("No markers here\n"), "No markers here");
        assert_eq!(FormatterFamily::Default.strip_turn_artifacts("Hi<|im_end|>\n"), "Hi");
        assert_eq!(FormatterFamily::Mistral.strip_turn_artifacts("Hi</s>[INST]"), "Hi");
    }

    #[test]
    fn test_strip_is_idempotent() {
        for family in [FormatterFamily::Default, FormatterFamily::Llama3, FormatterFamily::Mistral] {
            for raw in ["Hello world", "  spaced  ", "a<|eot_id|>b", "x<|im_end|>y", "y</s>z"] {
                let once = family.strip_turn_artifacts(raw);
                assert_eq!(family.strip_turn_artifacts(&once), once);
            }
        }
    }
}
