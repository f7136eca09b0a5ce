//! Chat transcript as shown to the user.

use crate::events::ToolCallEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    User {
        text: String,
    },
    Assistant {
        text: String,
        /// Latest event per tool call, in first-seen order
        actions: Vec<ToolCallEvent>,
    },
}

impl ChatMessage {
    fn empty_assistant() -> Self {
        ChatMessage::Assistant {
            text: String::new(),
            actions: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            ChatMessage::User { text } | ChatMessage::Assistant { text, .. } => text,
        }
    }
}

/// Starts with one empty assistant message so a greeting streamed before
/// any user input has somewhere to go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self {
            messages: vec![ChatMessage::empty_assistant()],
        }
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append a user message and the assistant message that will answer it.
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::User { text: text.into() });
        self.messages.push(ChatMessage::empty_assistant());
    }

    pub fn append_text(&mut self, delta: &str) {
        if let ChatMessage::Assistant { text, .. } = self.last_assistant() {
            text.push_str(delta);
        }
    }

    /// Record a tool-call event, replacing the earlier event with its id.
    pub fn apply_event(&mut self, event: &ToolCallEvent) {
        if let ChatMessage::Assistant { actions, .. } = self.last_assistant() {
            match actions.iter_mut().find(|a| a.id == event.id) {
                Some(existing) => *existing = event.clone(),
                None => actions.push(event.clone()),
            }
        }
    }

    fn last_assistant(&mut self) -> &mut ChatMessage {
        let index = match self
            .messages
            .iter()
            .rposition(|m| matches!(m, ChatMessage::Assistant { .. }))
        {
            Some(index) => index,
            None => {
                self.messages.push(ChatMessage::empty_assistant());
                self.messages.len() - 1
            }
        };
        &mut self.messages[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ToolAction;

    fn read(id: &str) -> ToolAction {
        ToolAction::ReadFile {
            path: format!("{}.ts", id),
        }
    }

    #[test]
    fn test_starts_with_empty_assistant_message() {
        let transcript = Transcript::new();
        assert_eq!(transcript.messages(), &[ChatMessage::empty_assistant()]);
    }

    #[test]
    fn test_deltas_go_to_latest_assistant_message() {
        let mut transcript = Transcript::new();
        transcript.append_text("Hi! ");
        transcript.push_user("start the dev server");
        transcript.append_text("Running ");
        transcript.append_text("npm run dev");

        let texts: Vec<&str> = transcript.messages().iter().map(ChatMessage::text).collect();
        assert_eq!(texts, vec!["Hi! ", "start the dev server", "Running npm run dev"]);
    }

    #[test]
    fn test_events_merge_by_id() {
        let mut transcript = Transcript::new();
        transcript.apply_event(&ToolCallEvent::pending("a", read("a")));
        transcript.apply_event(&ToolCallEvent::pending("b", read("b")));
        transcript.apply_event(&ToolCallEvent::resolved("a", read("a")));

        let ChatMessage::Assistant { actions, .. } = &transcript.messages()[0] else {
            panic!("expected an assistant message");
        };
        assert_eq!(
            actions,
            &vec![
                ToolCallEvent::resolved("a", read("a")),
                ToolCallEvent::pending("b", read("b")),
            ]
        );
    }

    #[test]
    fn test_wire_form() {
        let mut transcript = Transcript::new();
        transcript.push_user("hello");
        let value = serde_json::to_value(transcript.messages()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {"role": "assistant", "text": "", "actions": []},
                {"role": "user", "text": "hello"},
                {"role": "assistant", "text": "", "actions": []}
            ])
        );
    }
}
