//! Deterministic offline refiner.
//!
//! Rewrites the live body of the version store with simple text rules so the
//! session can exercise the full refine/rollback cycle without a model.

use async_trait::async_trait;
use inkdraft_core::{
    BackendError, BackendResult, ContentBlock, ContentRefiner, DocumentBody,
    DocumentVersionStore, RefinementKind, RefinementProposal,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct LocalRefiner {
    store: Arc<DocumentVersionStore>,
    /// Number of leading calls that fail with a model error.
    failures_left: AtomicUsize,
}

impl LocalRefiner {
    pub fn new(store: Arc<DocumentVersionStore>, fail_first: usize) -> Self {
        Self {
            store,
            failures_left: AtomicUsize::new(fail_first),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ContentRefiner for LocalRefiner {
    async fn refine(
        &self,
        id: &str,
        prompt: &str,
        kind: RefinementKind,
    ) -> BackendResult<RefinementProposal> {
        if self.take_failure() {
            return Err(BackendError::Model("simulated model overload".to_string()));
        }
        let body = self
            .store
            .body()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if body.plain_text().is_empty() {
            return Err(BackendError::Validation("document has no text to refine".to_string()));
        }

        let updated_body = rewrite(&body, prompt, kind);
        let message = match kind {
            RefinementKind::Shorten => "Kept the first sentence of each paragraph.",
            RefinementKind::Expand | RefinementKind::Custom => "Added a paragraph from your prompt.",
            RefinementKind::Improve => "Tightened sentence openings and endings.",
            RefinementKind::Rephrase => "Reworded the opening.",
            RefinementKind::FixGrammar => "Fixed spacing, capitalization and punctuation.",
        };
        Ok(RefinementProposal {
            updated_body,
            message: message.to_string(),
        })
    }
}

fn rewrite(body: &DocumentBody, prompt: &str, kind: RefinementKind) -> DocumentBody {
    let mut updated = body.clone();
    match kind {
        RefinementKind::Shorten => map_text(&mut updated, first_sentence),
        RefinementKind::Improve | RefinementKind::FixGrammar => map_text(&mut updated, tidy),
        RefinementKind::Rephrase => {
            if let Some(block) = updated.blocks.iter_mut().find(|block| text_of(block).is_some()) {
                if let Some(text) = text_of(block) {
                    set_text(block, format!("Put simply, {}", lowercase_first(&text)));
                }
            }
        }
        RefinementKind::Expand | RefinementKind::Custom => {
            let id = format!("refined-{}", updated.blocks.len());
            updated
                .blocks
                .push(ContentBlock::paragraph(id, tidy(prompt)));
        }
    }
    updated
}

fn text_of(block: &ContentBlock) -> Option<String> {
    match block.kind.as_str() {
        "paragraph" | "header" | "quote" => block.text(),
        _ => None,
    }
}

fn set_text(block: &mut ContentBlock, text: String) {
    if let Value::Object(data) = &mut block.data {
        data.insert("text".to_string(), Value::String(text));
    }
}

fn map_text(body: &mut DocumentBody, rule: fn(&str) -> String) {
    for block in &mut body.blocks {
        if let Some(text) = text_of(block) {
            set_text(block, rule(&text));
        }
    }
}

fn first_sentence(text: &str) -> String {
    match text.find(['.', '!', '?']) {
        Some(end) => text[..=end].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn tidy(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .map(|word| if word == "i" { "I" } else { word })
        .collect::<Vec<_>>()
        .join(" ");
    let mut tidied = capitalize_first(&collapsed);
    if !tidied.is_empty() && !tidied.ends_with(['.', '!', '?']) {
        tidied.push('.');
    }
    tidied
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn lowercase_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
