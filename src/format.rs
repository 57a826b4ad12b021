// Text cleanup for assistant replies: converts the markup conventions the
// remote service emits into HTML the frontend can drop into the page.

use lazy_static::lazy_static;
use regex::Regex;

use crate::assistant::{ContentBlock, MessageContent};

lazy_static! {
    // Non-greedy, so `**a** and **b**` yields two separate bold spans.
    static ref BOLD_RE: Regex = Regex::new(r"\*\*(.*?)\*\*").unwrap();
    // Citation artifacts the service embeds, e.g. `【4:0†source】`.
    static ref CITATION_RE: Regex = Regex::new(r"【.*?】").unwrap();
}

/// Flatten a message's content into a single plain string.
///
/// The remote service returns content either as a plain string or as a list
/// of content blocks; blocks the decoder does not recognize are stringified
/// rather than rejected, so this never fails.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => {
            let parts: Vec<String> = blocks
                .iter()
                .map(extract_block_text)
                .filter(|part| !part.is_empty())
                .collect();
            parts.join(" ")
        }
        MessageContent::TextBlock { text } => text.value.clone(),
        MessageContent::Value { value } => value.clone(),
        MessageContent::Other(serde_json::Value::Null) => String::new(),
        MessageContent::Other(other) => other.to_string(),
    }
}

fn extract_block_text(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Str(text) => text.clone(),
        ContentBlock::Text { text } => text.value.clone(),
        ContentBlock::Value { value } => value.clone(),
        ContentBlock::Other(serde_json::Value::Null) => String::new(),
        ContentBlock::Other(other) => other.to_string(),
    }
}

/// Convert extracted text into display-ready HTML.
///
/// Bold conversion runs before citation stripping; asterisks inside a
/// citation span disappear with the span. Tests pin this ordering.
pub fn format_html(text: &str) -> String {
    let html = BOLD_RE.replace_all(text, "<strong>$1</strong>");
    let html = html.replace('\n', "<br>");
    CITATION_RE.replace_all(&html, "").into_owned()
}

/// Full normalization pipeline for one message's content.
pub fn format_message(content: &MessageContent) -> String {
    format_html(&extract_text(content))
}
