//! Model-service adapters: one typed request/response pair per stage.

pub mod summarizer;
pub mod test_writer;

use serde::{Deserialize, Serialize};

/// A fetched source file handed to the model as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub content: String,
}

impl CodeFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Render context files as one prompt section.
pub(crate) fn render_code_files(files: &[CodeFile]) -> String {
    let mut out = String::new();
    for file in files {
        out.push_str("File name: ");
        out.push_str(&file.path);
        out.push_str("\nFile content:\n");
        out.push_str(&file.content);
        if !file.content.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Parse a JSON object out of a model reply that may carry markdown code
/// fences, `<think>` blocks, or surrounding prose.
///
/// Tries, in order: the whole reply; the reply without `<think>` blocks;
/// the last fenced block that looks like an object; the outermost `{...}`.
pub(crate) fn extract_json<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    if let Ok(val) = serde_json::from_str::<T>(raw) {
        return Some(val);
    }

    let cleaned = strip_think_blocks(raw);
    let trimmed = cleaned.trim();
    if let Ok(val) = serde_json::from_str::<T>(trimmed) {
        return Some(val);
    }

    if let Some(block) = last_fenced_block(trimmed, |body| body.starts_with('{'))
        && let Ok(val) = serde_json::from_str::<T>(block)
    {
        return Some(val);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<T>(&trimmed[start..=end]).ok()
}

/// Remove `<think>...</think>` blocks. An unclosed tag drops the rest.
pub(crate) fn strip_think_blocks(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut remaining = s;
    while let Some(start) = remaining.find("<think>") {
        result.push_str(&remaining[..start]);
        match remaining[start..].find("</think>") {
            Some(end) => remaining = &remaining[start + end + "</think>".len()..],
            None => return result,
        }
    }
    result.push_str(remaining);
    result
}

/// Body of the last fenced block (```lang ... ```) accepted by `accept`.
pub(crate) fn last_fenced_block(s: &str, accept: impl Fn(&str) -> bool) -> Option<&str> {
    let fences: Vec<usize> = s.match_indices("```").map(|(pos, _)| pos).collect();
    if fences.len() < 2 {
        return None;
    }

    for pair in fences.windows(2).rev() {
        let (open, close) = (pair[0], pair[1]);
        let after_fence = &s[open + 3..];
        let body_start = open + 3 + after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        if body_start < close {
            let body = s[body_start..close].trim();
            if accept(body) {
                return Some(body);
            }
        }
    }
    None
}

/// Drop a single fence wrapping the whole text, keeping its body.
pub(crate) fn unwrap_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```")) || trimmed.len() < 6 {
        return trimmed;
    }
    let inner = &trimmed[3..trimmed.len() - 3];
    match inner.find('\n') {
        Some(i) => inner[i + 1..].trim_end(),
        None => inner.trim(),
    }
}
