//! Canvas-context snapshot sent by the front-end with each turn.
//!
//! The front-end builds this from live canvas state, so its shape is only
//! loosely guaranteed. Every field is optional, scalar fields accept
//! strings or numbers, and malformed list entries are skipped instead of
//! failing the whole request.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::text::clip;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasContext {
    #[serde(default, deserialize_with = "lenient")]
    pub summary: Option<CanvasSummary>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub characters: Vec<CharacterEntry>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub story_context: Vec<StoryExcerpt>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub timeline: Vec<TimelineEntry>,

    #[serde(default, deserialize_with = "lenient_list")]
    pub nodes: Vec<CanvasNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSummary {
    #[serde(default, deserialize_with = "lenient")]
    pub node_count: Option<u64>,
    #[serde(default, deserialize_with = "lenient")]
    pub edge_count: Option<u64>,
    #[serde(default, deserialize_with = "string_list")]
    pub kinds: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterEntry {
    #[serde(default, deserialize_with = "string_like")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub node_id: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryExcerpt {
    #[serde(default, deserialize_with = "string_like")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub node_id: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub prompt_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    #[serde(default, deserialize_with = "string_like")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub node_id: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    #[serde(default, deserialize_with = "string_like")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub kind: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "string_like")]
    pub node_type: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub prompt_preview: Option<String>,
    #[serde(default, deserialize_with = "string_like")]
    pub image_url: Option<String>,
}

impl CanvasNode {
    /// `label`, falling back to the node id.
    pub fn display_label(&self) -> Option<&str> {
        self.label.as_deref().or(self.id.as_deref())
    }

    /// `kind`, falling back to the React Flow node `type`.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref().or(self.node_type.as_deref())
    }

    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref().filter(|u| !u.is_empty())
    }
}

impl CanvasContext {
    /// Parse a raw JSON snapshot; anything that is not an object yields an
    /// empty context.
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }
        Self::deserialize(value).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
            && self.characters.is_empty()
            && self.story_context.is_empty()
            && self.timeline.is_empty()
            && self.nodes.is_empty()
    }

    /// Whether any existing node carries this exact label.
    pub fn has_label(&self, label: &str) -> bool {
        self.nodes.iter().any(|n| n.label.as_deref() == Some(label))
    }

    /// Compact prompt rendering. Negative prompts are never included so
    /// they cannot leak trigger words into the classifiers.
    pub fn render_for_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(summary) = &self.summary {
            let mut meta = Vec::new();
            if let Some(n) = summary.node_count {
                meta.push(format!("nodes={n}"));
            }
            if let Some(n) = summary.edge_count {
                meta.push(format!("edges={n}"));
            }
            let kinds: Vec<&str> = summary.kinds.iter().take(8).map(String::as_str).collect();
            if !kinds.is_empty() {
                meta.push(format!("kinds=[{}]", kinds.join(", ")));
            }
            if !meta.is_empty() {
                parts.push(format!("summary: {}", meta.join(" | ")));
            }
        }

        if !self.characters.is_empty() {
            parts.push("characters:".into());
            for c in self.characters.iter().take(6) {
                let label = c
                    .label
                    .as_deref()
                    .or(c.username.as_deref())
                    .or(c.node_id.as_deref());
                let mut line = match label {
                    Some(l) => format!("- {}", clip(l, 80)),
                    None => "- (unnamed)".to_string(),
                };
                if let Some(desc) = c.description.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
                    line.push_str(&format!(" | {}", clip(desc, 140)));
                }
                parts.push(line);
            }
        }

        if !self.story_context.is_empty() {
            parts.push("storyContext (recent excerpts):".into());
            for item in self.story_context.iter().take(2) {
                let label = item.label.as_deref().or(item.node_id.as_deref()).unwrap_or("");
                if let Some(excerpt) = item.prompt_excerpt.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                    parts.push(format!("- {}: {}", clip(label, 60), clip(excerpt, 500)));
                }
            }
        }

        if !self.timeline.is_empty() {
            parts.push("timeline (top):".into());
            for t in self.timeline.iter().take(6) {
                let mut bits = Vec::new();
                if let Some(label) = t.label.as_deref().or(t.node_id.as_deref()) {
                    bits.push(clip(label, 80).to_string());
                }
                if let Some(kind) = &t.kind {
                    bits.push(format!("kind={}", clip(kind, 24)));
                }
                if let Some(status) = &t.status {
                    bits.push(format!("status={}", clip(status, 16)));
                }
                if let Some(d) = t.duration {
                    bits.push(format!("duration={}s", d.trunc() as i64));
                }
                if !bits.is_empty() {
                    parts.push(format!("- {}", bits.join(" | ")));
                }
            }
        }

        if !self.nodes.is_empty() {
            parts.push("nodes (sample):".into());
            for n in self.nodes.iter().take(10) {
                let mut bits = Vec::new();
                if let Some(label) = n.display_label() {
                    bits.push(clip(label, 80).to_string());
                }
                if let Some(kind) = n.kind() {
                    bits.push(format!("kind={}", clip(kind, 24)));
                }
                if let Some(status) = &n.status {
                    bits.push(format!("status={}", clip(status, 16)));
                }
                if let Some(preview) = n.prompt_preview.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                    bits.push(format!("prompt='{}'", clip(preview, 120)));
                }
                if !bits.is_empty() {
                    parts.push(format!("- {}", bits.join(" | ")));
                }
            }
        }

        parts.join("\n").trim().to_string()
    }
}

// --- Lenient deserializers ---

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_like<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(Value::deserialize(deserializer)?))
}

fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items.into_iter().filter_map(scalar_to_string).collect())
}
