//! Chat templates.
//!
//! Render a conversation into the raw prompt a model was trained on, ending
//! with the generation prompt so the model answers as the assistant.

use crate::config::TemplateKind;
use crate::models::{ChatMessage, MessageRole};

const BOS: &str = "<｜begin▁of▁sentence｜>";
const EOS: &str = "<｜end▁of▁sentence｜>";
const USER: &str = "<｜User｜>";
const ASSISTANT: &str = "<｜Assistant｜>";
const THINK_END: &str = "</think>";

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTemplate {
    kind: TemplateKind,
}

impl ChatTemplate {
    pub fn new(kind: TemplateKind) -> Self {
        Self { kind }
    }

    pub fn render(&self, conversation: &[ChatMessage]) -> String {
        match self.kind {
            TemplateKind::Deepseek => render_deepseek(conversation),
            TemplateKind::Chatml => render_chatml(conversation),
        }
    }
}

/// DeepSeek-R1 distill format. System messages are hoisted to the front;
/// earlier assistant turns lose their reasoning block.
fn render_deepseek(conversation: &[ChatMessage]) -> String {
    let system: Vec<&str> = conversation
        .iter()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .collect();

    let mut out = String::from(BOS);
    out.push_str(&system.join("\n\n"));

    for message in conversation {
        match message.role {
            MessageRole::System => {}
            MessageRole::User => {
                out.push_str(USER);
                out.push_str(&message.content);
            }
            MessageRole::Assistant => {
                let answer = match message.content.rsplit_once(THINK_END) {
                    Some((_, after)) => after.trim_start(),
                    None => message.content.as_str(),
                };
                out.push_str(ASSISTANT);
                out.push_str(answer);
                out.push_str(EOS);
            }
        }
    }

    out.push_str(ASSISTANT);
    out
}

fn render_chatml(conversation: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in conversation {
        out.push_str(IM_START);
        out.push_str(message.role.as_str());
        out.push('\n');
        out.push_str(&message.content);
        out.push_str(IM_END);
        out.push('\n');
    }
    out.push_str(IM_START);
    out.push_str("assistant\n");
    out
}
