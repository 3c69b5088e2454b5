use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::message::ConversationId;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_TITLE: &str = "New chat";
pub const TITLE_MAX_CHARS: usize = 50;
const TITLE_ELLIPSIS: &str = "...";

/// A titled container for one message tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    selected_models: Vec<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Builds a conversation, falling back to [`DEFAULT_MODEL`] when no model
    /// is selected so the selection is never empty.
    pub fn new(
        id: ConversationId,
        title: impl Into<String>,
        selected_models: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let selected_models = normalize_models(selected_models)
            .unwrap_or_else(|| vec![DEFAULT_MODEL.to_string()]);
        Self {
            id,
            title: title.into(),
            selected_models,
            tags: BTreeSet::new(),
            created_at,
            updated_at: created_at,
        }
    }

    pub fn selected_models(&self) -> &[String] {
        &self.selected_models
    }

    /// The model used for generation requests.
    pub fn primary_model(&self) -> &str {
        self.selected_models
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }

    /// Replace the selection. Empty selections are refused.
    pub fn set_selected_models(&mut self, models: Vec<String>) -> bool {
        match normalize_models(models) {
            Some(models) => {
                self.selected_models = models;
                true
            }
            None => false,
        }
    }

    /// Deselect `model` if selected (unless it is the last one), select it
    /// otherwise. Returns whether the selection changed.
    pub fn toggle_model(&mut self, model: &str) -> bool {
        if let Some(index) = self.selected_models.iter().position(|m| m == model) {
            if self.selected_models.len() == 1 {
                return false;
            }
            self.selected_models.remove(index);
        } else {
            self.selected_models.push(model.to_string());
        }
        true
    }

    pub fn has_default_title(&self, default_title: &str) -> bool {
        self.title == default_title
    }

    /// Merge a partial update. `updated_at` is always refreshed.
    pub fn apply_patch(&mut self, patch: ConversationPatch, now: DateTime<Utc>) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(models) = patch.selected_models {
            if !self.set_selected_models(models) {
                tracing::warn!(conversation = %self.id, "ignoring empty model selection");
            }
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch {
    pub title: Option<String>,
    pub selected_models: Option<Vec<String>>,
    pub tags: Option<BTreeSet<String>>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn selected_models(models: Vec<String>) -> Self {
        Self {
            selected_models: Some(models),
            ..Self::default()
        }
    }
}

fn normalize_models(models: Vec<String>) -> Option<Vec<String>> {
    let mut seen = BTreeSet::new();
    let models: Vec<String> = models
        .into_iter()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty() && seen.insert(model.clone()))
        .collect();
    (!models.is_empty()).then_some(models)
}

/// Derive a display title from the first user message: the first
/// `max_chars` characters, with an ellipsis marker when truncated.
pub fn derive_title(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        head
    }
}
