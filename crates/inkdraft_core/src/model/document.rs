//! Document domain model.
//!
//! # Responsibility
//! - Define the authored content unit and its block-structured body.
//! - Derive plain-text previews used to label versions.
//!
//! # Invariants
//! - `id` is assigned externally and never changes once loaded.
//! - Version operations change only `body` and `metadata.updated_at`.
//! - `updated_at` strictly increases on every `touch()`.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

static INLINE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid inline tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

const PREVIEW_MAX_CHARS: usize = 100;

/// Externally assigned document identifier.
pub type DocumentId = String;

/// One typed content block (`paragraph`, `header`, `list`, `image`, ...).
///
/// `data` is opaque to the core; only equality and substitution matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    /// Serialized as `type` to match the editor output schema.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ContentBlock {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            data,
        }
    }

    /// Convenience constructor for a `paragraph` block.
    pub fn paragraph(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            "paragraph",
            serde_json::json!({ "text": text.into() }),
        )
    }

    /// Convenience constructor for a `header` block.
    pub fn header(id: impl Into<String>, text: impl Into<String>, level: u8) -> Self {
        Self::new(
            id,
            "header",
            serde_json::json!({ "text": text.into(), "level": level }),
        )
    }

    /// Returns the readable text carried by text-like blocks.
    ///
    /// Non-text blocks (images, tables, embeds) yield `None`.
    pub fn text(&self) -> Option<String> {
        match self.kind.as_str() {
            "paragraph" | "header" | "quote" => self
                .data
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            "list" | "checklist" => {
                let items = self.data.get("items")?.as_array()?;
                let parts: Vec<&str> = items
                    .iter()
                    .filter_map(|item| {
                        item.as_str()
                            .or_else(|| item.get("content").and_then(Value::as_str))
                            .or_else(|| item.get("text").and_then(Value::as_str))
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" "))
                }
            }
            _ => None,
        }
    }
}

/// Ordered block sequence produced by the block editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    /// Editor save time in epoch milliseconds, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    /// Editor schema version string, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DocumentBody {
    pub fn new(blocks: Vec<ContentBlock>) -> Self {
        Self {
            time: None,
            blocks,
            version: None,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Joins the text of all text-like blocks, markup removed.
    pub fn plain_text(&self) -> String {
        let joined = self
            .blocks
            .iter()
            .filter_map(ContentBlock::text)
            .collect::<Vec<_>>()
            .join(" ");
        normalize_inline_text(&joined)
    }

    /// Derives a short plain-text preview for version listings.
    ///
    /// Rules:
    /// - Inline HTML markup is stripped and common entities decoded.
    /// - Whitespace is collapsed; the first 100 chars are retained.
    /// - Bodies without any text yield `None`.
    pub fn preview_text(&self) -> Option<String> {
        let text = self.plain_text();
        if text.is_empty() {
            None
        } else {
            Some(text.chars().take(PREVIEW_MAX_CHARS).collect())
        }
    }
}

fn normalize_inline_text(value: &str) -> String {
    let without_tags = INLINE_TAG_RE.replace_all(value, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&");
    WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string()
}

/// Descriptive fields carried unchanged through version operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Document validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentValidationError {
    #[error("document id cannot be blank")]
    BlankId,
    #[error("document title cannot be blank")]
    BlankTitle,
    #[error("updated_at ({updated_at}) is earlier than created_at ({created_at})")]
    UpdatedBeforeCreated {
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    },
}

/// The authored content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub body: DocumentBody,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Creates a document stamped with the current time.
    pub fn new(id: impl Into<DocumentId>, title: impl Into<String>, body: DocumentBody) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            body,
            metadata: DocumentMetadata {
                title: title.into(),
                summary: None,
                category: None,
                tags: Vec::new(),
                banner_url: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    /// Replaces the body and bumps `updated_at`, returning the previous body.
    pub fn replace_body(&mut self, body: DocumentBody) -> DocumentBody {
        let previous = std::mem::replace(&mut self.body, body);
        self.touch();
        previous
    }

    /// Bumps `updated_at`, keeping it strictly increasing even when the
    /// clock has not advanced since the last bump.
    pub fn touch(&mut self) {
        let now = Utc::now();
        let previous = self.metadata.updated_at;
        self.metadata.updated_at = if now > previous {
            now
        } else {
            previous + Duration::milliseconds(1)
        };
    }

    /// Validates identity and timestamp ordering.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        if self.id.trim().is_empty() {
            return Err(DocumentValidationError::BlankId);
        }
        if self.metadata.title.trim().is_empty() {
            return Err(DocumentValidationError::BlankTitle);
        }
        if self.metadata.updated_at < self.metadata.created_at {
            return Err(DocumentValidationError::UpdatedBeforeCreated {
                created_at: self.metadata.created_at,
                updated_at: self.metadata.updated_at,
            });
        }
        Ok(())
    }
}
