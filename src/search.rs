use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::block::{Category, SortBy, SortOrder};
use crate::natural::natural_cmp;
use crate::normalize::normalize_text;
use crate::vault::{Document, Vault};

/// Inputs of one search pass.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub emoji_tag: Option<&'a str>,
    pub categories: &'a [Category],
    /// Document hosting the widget: never listed, target of backlinks
    pub current: Option<&'a Document>,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub document: Document,
    /// Content as read during the pass
    pub content: String,
    pub matches_name: bool,
    pub matches_content: bool,
    pub is_backlink: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchMode {
    /// Normalized, trimmed query
    Text(String),
    Tag(String),
    /// Title of the current document
    Backlinks(String),
}

impl SearchMode {
    pub fn select(query: &str, emoji_tag: Option<&str>, current: Option<&Document>) -> Self {
        let filter = normalize_text(query.trim());
        let filter = filter.trim();
        if !filter.is_empty() {
            return SearchMode::Text(filter.to_string());
        }
        match emoji_tag.filter(|t| !t.is_empty()) {
            Some(tag) => SearchMode::Tag(tag.to_string()),
            None => SearchMode::Backlinks(current.map(|d| d.basename.clone()).unwrap_or_default()),
        }
    }
}

fn emoji_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\p{Emoji_Presentation}\x{FE0F}?) ").expect("valid emoji tag regex")
    })
}

/// Leading emoji tag of a display name: `"📝 Alpha"` -> `Some("📝")`.
pub fn emoji_tag(basename: &str) -> Option<&str> {
    emoji_tag_re()
        .captures(basename)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Whether `content` links to `title` as `[[title]]` or `[[title|alias]]`.
pub fn contains_link_to(content: &str, title: &str) -> bool {
    if title.is_empty() {
        return false;
    }
    let pattern = format!(r"(?i)\[\[{}(?:\|[^\]]*)?\]\]", regex::escape(title));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(content),
        Err(e) => {
            tracing::warn!("Cannot build backlink pattern for '{}': {}", title, e);
            false
        }
    }
}

/// A document is in scope when it sits under any category folder. With no
/// categories at all everything is in scope.
pub fn in_scope(doc: &Document, categories: &[Category]) -> bool {
    categories.is_empty() || categories.iter().any(|c| doc.path.starts_with(&c.path))
}

fn is_current(doc: &Document, current: Option<&Document>) -> bool {
    current.map_or(false, |c| c.path == doc.path)
}

/// Order two documents by the block's sort policy.
pub fn compare_documents(a: &Document, b: &Document, sort_by: SortBy, sort_order: SortOrder) -> Ordering {
    let ord = match sort_by {
        SortBy::Name => natural_cmp(&a.basename, &b.basename),
        SortBy::Date => a.mtime.cmp(&b.mtime),
    };
    match sort_order {
        SortOrder::Asc => ord,
        SortOrder::Desc => ord.reverse(),
    }
}

/// Run one search pass over the vault.
///
/// Documents are read one after another; a document that cannot be read is
/// logged and skipped.
pub async fn search<V: Vault + ?Sized>(vault: &V, request: &SearchRequest<'_>) -> Vec<SearchResult> {
    let mode = SearchMode::select(request.query, request.emoji_tag, request.current);
    let tag_filter = request.emoji_tag.filter(|t| !t.is_empty());

    let documents = match vault.list_documents().await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("Cannot list documents: {}", e);
            return Vec::new();
        }
    };

    let mut results = Vec::new();
    for doc in documents {
        if !in_scope(&doc, request.categories) || is_current(&doc, request.current) {
            continue;
        }
        if let Some(tag) = tag_filter {
            if emoji_tag(&doc.basename) != Some(tag) {
                continue;
            }
        }

        let content = match vault.cached_read(&doc).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", doc.path, e);
                continue;
            }
        };

        let (matches_name, matches_content, is_backlink) = match &mode {
            SearchMode::Text(filter) => (
                normalize_text(&doc.basename).contains(filter.as_str()),
                normalize_text(&content).contains(filter.as_str()),
                false,
            ),
            SearchMode::Tag(_) => (true, false, false),
            SearchMode::Backlinks(title) => (false, false, contains_link_to(&content, title)),
        };

        if matches_name || matches_content || is_backlink {
            results.push(SearchResult {
                document: doc,
                content,
                matches_name,
                matches_content,
                is_backlink,
            });
        }
    }

    let name_first = matches!(mode, SearchMode::Text(_));
    results.sort_by(|a, b| {
        let partition = if name_first {
            b.matches_name.cmp(&a.matches_name)
        } else {
            Ordering::Equal
        };
        partition.then_with(|| {
            compare_documents(&a.document, &b.document, request.sort_by, request.sort_order)
        })
    });

    tracing::debug!(?mode, results = results.len(), "search pass finished");
    results
}

/// Distinct emoji tags among the documents a widget can show, sorted.
pub async fn available_tags<V: Vault + ?Sized>(
    vault: &V,
    categories: &[Category],
    current: Option<&Document>,
) -> Vec<String> {
    let documents = match vault.list_documents().await {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!("Cannot list documents: {}", e);
            return Vec::new();
        }
    };

    documents
        .iter()
        .filter(|doc| in_scope(doc, categories) && !is_current(doc, current))
        .filter_map(|doc| emoji_tag(&doc.basename).map(str::to_string))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
