//! In-process text tools.

use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::InvocationMode;
use crate::sink::ChunkSink;
use crate::tool::{Tool, ToolResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// Renders a fixed text with `{parameter}` placeholders.
///
/// Braces that do not enclose an identifier are kept literally. In streaming
/// mode the rendered text is emitted word by word before the full text is
/// returned.
#[derive(Debug, Clone)]
pub struct TemplateTool {
    segments: Vec<Segment>,
    mode: InvocationMode,
}

impl TemplateTool {
    /// Parses `text` into literal and placeholder segments.
    #[must_use]
    pub fn parse(text: &str, mode: InvocationMode) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if is_identifier(&after[..close]) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(after[..close].to_owned()));
                    rest = &after[close + 1..];
                }
                _ => {
                    literal.push('{');
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Self { segments, mode }
    }

    /// Names referenced by the template, in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the template; absent arguments render as empty text.
    #[must_use]
    pub fn render(&self, arguments: &Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(name) => match arguments.get(name) {
                    Some(Value::String(text)) => out.push_str(text),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                },
            }
        }
        out
    }
}

fn is_identifier(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[async_trait]
impl Tool for TemplateTool {
    async fn invoke(&self, input: Value, sink: ChunkSink) -> ToolResult<Value> {
        let text = self.render(&input);
        if self.mode == InvocationMode::Streaming {
            for word in text.split_inclusive(' ') {
                sink.output_delta(word).await?;
            }
        }
        Ok(Value::String(text))
    }
}
