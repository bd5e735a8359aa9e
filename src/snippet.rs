use crate::normalize::{normalize_text, normalize_with_offsets};

/// Characters kept on each side of the first hit.
const CONTEXT_CHARS: usize = 60;
/// Extra slack on the original text so accents near the edges are not cut.
const EDGE_SLACK: usize = 20;

/// Markers wrapped around every highlighted hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emphasis {
    pub open: &'static str,
    pub close: &'static str,
}

impl Default for Emphasis {
    fn default() -> Self {
        Self {
            open: "<strong>",
            close: "</strong>",
        }
    }
}

fn find_all(haystack: &[char], needle: &[char]) -> Vec<usize> {
    let mut hits = Vec::new();
    if needle.is_empty() || needle.len() > haystack.len() {
        return hits;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()] == *needle {
            hits.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    hits
}

/// Cut the part of `content` around the first accent-insensitive hit of
/// `normalized_query`, with newlines flattened to spaces.
///
/// Returns `None` when the query does not occur.
pub fn extract_window(content: &str, normalized_query: &str) -> Option<String> {
    let chars: Vec<char> = content.chars().collect();
    let (folded, origin) = normalize_with_offsets(&chars);
    let needle: Vec<char> = normalized_query.chars().collect();
    if needle.is_empty() {
        return None;
    }

    let hit = folded
        .windows(needle.len())
        .position(|w| w == needle.as_slice())?;
    let at = origin[hit];
    let q = needle.len();

    let start = at.saturating_sub(CONTEXT_CHARS + EDGE_SLACK);
    let end = (at + q + CONTEXT_CHARS + q + EDGE_SLACK).min(chars.len());

    Some(
        chars[start..end]
            .iter()
            .map(|&c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect(),
    )
}

/// Wrap every non-overlapping accent- and case-insensitive occurrence of
/// `query` in `text` with `emphasis`, keeping the original spelling.
pub fn highlight_with(text: &str, query: &str, emphasis: Emphasis) -> String {
    if text.is_empty() || query.is_empty() {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let (folded, origin) = normalize_with_offsets(&chars);
    let needle: Vec<char> = normalize_text(query).chars().collect();

    let mut out = String::with_capacity(text.len() + 16);
    let mut copied = 0;

    for hit in find_all(&folded, &needle) {
        let last = hit + needle.len() - 1;
        let start = origin[hit];
        // swallow trailing combining marks that folded away
        let end = match origin.get(last + 1) {
            Some(&next) => next.max(origin[last] + 1),
            None => chars.len(),
        };
        if start < copied {
            continue;
        }

        out.extend(&chars[copied..start]);
        out.push_str(emphasis.open);
        out.extend(&chars[start..end]);
        out.push_str(emphasis.close);
        copied = end;
    }

    out.extend(&chars[copied..]);
    out
}

pub fn highlight(text: &str, query: &str) -> String {
    highlight_with(text, query, Emphasis::default())
}

/// Preview line shown under a content match: `… snippet …`.
pub fn render_preview(content: &str, normalized_query: &str) -> Option<String> {
    let window = extract_window(content, normalized_query)?;
    Some(format!("… {} …", highlight(&window, normalized_query)))
}
