//! Prompt template loading and payload assembly.
//!
//! The template is a text resource with two named placeholders, `{query}`
//! and `{context}`. The assembler joins retrieved fragments into a knowledge
//! block, renders the composite message, and rebuilds the message sequence:
//! system message first, prior turns unmodified, composite as the final user
//! message. Only the final message carries the knowledge-augmented text —
//! the stored history keeps raw queries.

use std::path::Path;

use lorebook_core::error::TemplateError;
use lorebook_core::message::{Message, Role};
use lorebook_core::retrieval::KnowledgeFragment;
use serde::Serialize;

/// Substituted for the knowledge block when retrieval found nothing.
pub const NO_KNOWLEDGE_FALLBACK: &str =
    "No relevant information was found in the knowledge base.";

/// Exactly what is submitted to the completion service. Built fresh per
/// request, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PromptPayload {
    pub messages: Vec<Message>,
}

/// A prompt template with `{query}` and `{context}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// The compiled-in default template.
    pub fn builtin() -> Self {
        Self {
            template: include_str!("../templates/answer.txt").to_string(),
        }
    }

    /// Load a template from disk. Errors when the file is missing or a
    /// placeholder is absent; callers treat this as a startup failure.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|e| TemplateError::ReadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(content)
    }

    /// Validate and wrap template text.
    pub fn parse(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        for name in ["query", "context"] {
            if !template.contains(&format!("{{{name}}}")) {
                return Err(TemplateError::MissingPlaceholder { name });
            }
        }
        Ok(Self { template })
    }

    /// Substitute both placeholders in a single pass over the template, so
    /// placeholder-like text inside the values is left alone.
    pub fn render(&self, query: &str, context: &str) -> String {
        let mut out = String::with_capacity(self.template.len() + query.len() + context.len());
        let mut rest = self.template.as_str();

        while let Some(idx) = rest.find('{') {
            out.push_str(&rest[..idx]);
            let tail = &rest[idx..];
            if let Some(after) = tail.strip_prefix("{query}") {
                out.push_str(query);
                rest = after;
            } else if let Some(after) = tail.strip_prefix("{context}") {
                out.push_str(context);
                rest = after;
            } else {
                out.push('{');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);
        out
    }
}

/// Merges a query, retrieved knowledge, and history into a completion
/// payload.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    template: PromptTemplate,
}

impl PromptAssembler {
    pub fn new(template: PromptTemplate) -> Self {
        Self { template }
    }

    /// Build the payload for one completion call.
    pub fn build(
        &self,
        query: &str,
        knowledge: &[KnowledgeFragment],
        history: &[Message],
    ) -> PromptPayload {
        let knowledge_block = if knowledge.is_empty() {
            NO_KNOWLEDGE_FALLBACK.to_string()
        } else {
            knowledge
                .iter()
                .map(|f| f.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };

        let composite = self.template.render(query, &knowledge_block);

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(first) = history.first() {
            if first.role == Role::System {
                messages.push(first.clone());
            }
        }
        messages.extend(history.iter().filter(|m| m.role != Role::System).cloned());
        messages.push(Message::user(composite));

        PromptPayload { messages }
    }
}
