//! Rolling conversation context
//!
//! Keeps the recent user/assistant exchange for the generator. Oldest
//! turns fall off past the cap; a system prompt, when set, always stays
//! first.

use voice_call_core::{Message, Role};

#[derive(Debug, Clone)]
pub struct ConversationContext {
    system: Option<Message>,
    messages: Vec<Message>,
    max_turns: usize,
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn with_system(max_turns: usize, prompt: impl Into<String>) -> Self {
        let mut ctx = Self::new(max_turns);
        ctx.system = Some(Message::system(prompt));
        ctx
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
        self.trim();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
        self.trim();
    }

    /// Messages to send: system prompt first, then the retained window
    pub fn messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            out.push(system.clone());
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn trim(&mut self) {
        // One turn is a user message plus the assistant reply
        let cap = self.max_turns * 2;
        if self.messages.len() > cap {
            let excess = self.messages.len() - cap;
            self.messages.drain(0..excess);
        }
    }
}

/// Flatten messages into the single prompt string the generation
/// endpoint accepts
///
/// Role-labeled transcript with a trailing `Assistant:` line cueing the
/// model to continue the conversation.
pub fn flatten_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => {
                prompt.push_str(&message.content);
                prompt.push_str("\n\n");
            },
            Role::User => {
                prompt.push_str("User: ");
                prompt.push_str(&message.content);
                prompt.push('\n');
            },
            Role::Assistant => {
                prompt.push_str("Assistant: ");
                prompt.push_str(&message.content);
                prompt.push('\n');
            },
        }
    }
    prompt.push_str("Assistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_keeps_recent_turns() {
        let mut ctx = ConversationContext::new(2);
        for i in 0..5 {
            ctx.push_user(format!("question {}", i));
            ctx.push_assistant(format!("answer {}", i));
        }
        let messages = ctx.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].content, "question 3");
        assert_eq!(messages[3].content, "answer 4");
    }

    #[test]
    fn test_system_prompt_survives_trim() {
        let mut ctx = ConversationContext::with_system(1, "be brief");
        for i in 0..4 {
            ctx.push_user(format!("q{}", i));
            ctx.push_assistant(format!("a{}", i));
        }
        let messages = ctx.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be brief");
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_flatten_prompt_shape() {
        let mut ctx = ConversationContext::with_system(4, "be brief");
        ctx.push_user("hello");
        ctx.push_assistant("hi there");
        ctx.push_user("how are you?");

        let prompt = flatten_prompt(&ctx.messages());
        assert!(prompt.starts_with("be brief\n\n"));
        assert!(prompt.contains("User: hello\n"));
        assert!(prompt.contains("Assistant: hi there\n"));
        assert!(prompt.ends_with("User: how are you?\nAssistant:"));
    }
}
