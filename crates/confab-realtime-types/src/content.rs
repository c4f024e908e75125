//! Vendor content shapes and their normalization.
//!
//! Message content arrives on the wire either as a plain string or as an
//! ordered sequence of typed segments, and those segments come in two vendor
//! schemas: tagged blocks (`{"type": "text", ...}`) and untagged parts
//! (`{"text": ...}` / `{"inlineData": ...}`). Everything is reduced to one
//! internal [`Segment`] shape before it leaves the protocol layer; vendor
//! shapes never escape outward.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Message content exactly as it arrives on the wire.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MessageContent {
    /// A bare string.
    Text(String),
    /// An ordered sequence of vendor segments.
    Segments(Vec<VendorSegment>),
}

/// One segment in either vendor schema.
///
/// The tagged-block shape is tried first; anything without a recognized
/// `type` tag falls through to the part shape, whose fields are all optional.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum VendorSegment {
    Block(ContentBlock),
    Part(ContentPart),
}

/// Tagged-block vendor schema.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<Box<MessageContent>>,
        #[serde(default)]
        is_error: bool,
    },
}

/// Image payload carried by a tagged image block.
#[derive(Deserialize, Debug, Clone)]
pub struct ImageSource {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Untagged-part vendor schema. Exactly one field is expected to be set.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub function_call: Option<FunctionCall>,
    #[serde(default)]
    pub function_response: Option<FunctionResponse>,
}

/// Inline binary payload in the part schema (base64, usually image or audio).
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// A tool invocation in the part schema.
#[derive(Deserialize, Debug, Clone)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// A tool result in the part schema.
#[derive(Deserialize, Debug, Clone)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// The single internal content shape handed to the application layer.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum NormalizedContent {
    /// All-text content, reduced to one concatenated string.
    Text(String),
    /// Mixed content, one internal segment per vendor segment.
    Segments(Vec<Segment>),
}

/// One normalized content segment.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },
}

impl MessageContent {
    /// Reduces wire content to the internal shape.
    ///
    /// A plain string passes through. A segment sequence whose mapped
    /// segments are all text reduces to a single concatenated string;
    /// otherwise every segment maps to its internal shape. Segments that
    /// carry nothing recognizable are dropped with a warning.
    pub fn normalize(self) -> NormalizedContent {
        match self {
            MessageContent::Text(text) => NormalizedContent::Text(text),
            MessageContent::Segments(segments) => {
                let mapped: Vec<Segment> = segments
                    .into_iter()
                    .filter_map(VendorSegment::into_segment)
                    .collect();
                if mapped.iter().all(|s| matches!(s, Segment::Text { .. })) {
                    let joined = mapped
                        .into_iter()
                        .map(|s| match s {
                            Segment::Text { text } => text,
                            _ => unreachable!(),
                        })
                        .collect::<String>();
                    NormalizedContent::Text(joined)
                } else {
                    NormalizedContent::Segments(mapped)
                }
            }
        }
    }
}

impl VendorSegment {
    /// Maps one vendor segment to the internal shape, or `None` if it carries
    /// nothing recognizable.
    fn into_segment(self) -> Option<Segment> {
        match self {
            VendorSegment::Block(block) => Some(block.into_segment()),
            VendorSegment::Part(part) => part.into_segment(),
        }
    }
}

impl ContentBlock {
    fn into_segment(self) -> Segment {
        match self {
            ContentBlock::Text { text } => Segment::Text { text },
            ContentBlock::Image { source } => Segment::Image {
                media_type: source
                    .media_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                data: source.data.or(source.url).unwrap_or_default(),
            },
            ContentBlock::ToolUse { id, name, input } => Segment::ToolUse { id, name, input },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => Segment::ToolResult {
                id: tool_use_id,
                output: content.map(|c| c.normalize().flatten_text()).unwrap_or_default(),
                is_error,
            },
        }
    }
}

impl ContentPart {
    fn into_segment(self) -> Option<Segment> {
        if let Some(text) = self.text {
            Some(Segment::Text { text })
        } else if let Some(blob) = self.inline_data {
            Some(Segment::Image {
                media_type: blob.mime_type,
                data: blob.data,
            })
        } else if let Some(call) = self.function_call {
            let id = call.id.unwrap_or_else(|| call.name.clone());
            Some(Segment::ToolUse {
                id,
                name: call.name,
                input: call.args,
            })
        } else if let Some(resp) = self.function_response {
            Some(Segment::ToolResult {
                id: resp.name,
                output: resp.response.to_string(),
                is_error: false,
            })
        } else {
            warn!("Dropping content segment with no recognizable payload");
            None
        }
    }
}

impl NormalizedContent {
    /// Concatenates the textual portions of the content.
    pub fn flatten_text(&self) -> String {
        match self {
            NormalizedContent::Text(text) => text.clone(),
            NormalizedContent::Segments(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}
