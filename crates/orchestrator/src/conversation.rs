use amp_common::{GenerationParams, Message, Result, Role};
use amp_runtime::{Completion, TextEngine};
use tracing::debug;

/// Append-only message log pinned to one text-generation model
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    model_id: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    /// Messages sent to the engine.
    ///
    /// In single-message mode only the latest system message and the last
    /// message overall are kept, system first.
    pub fn project(&self, single_message_mode: bool) -> Vec<Message> {
        if !single_message_mode {
            return self.messages.clone();
        }

        let system = self.messages.iter().rposition(Message::is_system);
        let last = self.messages.len().checked_sub(1);

        let mut projected = Vec::with_capacity(2);
        if let Some(index) = system {
            projected.push(self.messages[index].clone());
        }
        if let Some(index) = last {
            if Some(index) != system {
                projected.push(self.messages[index].clone());
            }
        }
        projected
    }

    /// Generate the next assistant turn and append it to the log
    pub async fn generate(
        &mut self,
        engine: &dyn TextEngine,
        params: &GenerationParams,
        single_message_mode: bool,
    ) -> Result<Completion> {
        let context = self.project(single_message_mode);
        debug!(
            conversation = %self.id,
            sent = context.len(),
            total = self.messages.len(),
            "Generating reply"
        );

        let completion = engine.generate(&context, params).await?;
        self.add_message(Role::Assistant, completion.text.clone());
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn test_full_projection_keeps_order() {
        let mut conversation = Conversation::new("c1", "model.gguf");
        conversation.add_message(Role::System, "sys");
        conversation.add_message(Role::User, "one");
        conversation.add_message(Role::Assistant, "two");
        conversation.add_message(Role::User, "three");

        assert_eq!(contents(&conversation.project(false)), vec!["sys", "one", "two", "three"]);
    }

    #[test]
    fn test_single_projection_uses_latest_system() {
        let mut conversation = Conversation::new("c1", "model.gguf");
        conversation.add_message(Role::System, "old");
        conversation.add_message(Role::User, "one");
        conversation.add_message(Role::System, "new");
        conversation.add_message(Role::Assistant, "two");
        conversation.add_message(Role::User, "three");

        let projected = conversation.project(true);
        assert_eq!(contents(&projected), vec!["new", "three"]);
        assert_eq!(projected[0].role, Role::System);
    }

    #[test]
    fn test_single_projection_edge_cases() {
        let mut conversation = Conversation::new("c1", "model.gguf");
        assert!(conversation.project(true).is_empty());

        conversation.add_message(Role::User, "hi");
        assert_eq!(contents(&conversation.project(true)), vec!["hi"]);

        // The system message is also the last message
        conversation.add_message(Role::System, "sys");
        assert_eq!(contents(&conversation.project(true)), vec!["sys"]);
    }

    #[test]
    fn test_single_projection_never_exceeds_two() {
        let mut conversation = Conversation::new("c1", "model.gguf");
        for i in 0..10 {
            let role = match i % 3 {
                0 => Role::System,
                1 => Role::User,
                _ => Role::Assistant,
            };
            conversation.add_message(role, format!("m{}", i));

            let projected = conversation.project(true);
            assert!(projected.len() <= 2);
            assert_eq!(projected[0].role, Role::System);
        }
    }
}
