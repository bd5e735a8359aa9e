use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::settings::Settings;

/// Fence language that marks a configuration block inside a note.
pub const BLOCK_LANGUAGE: &str = "dynamicsearch";

const RECORD_SEPARATOR: &str = "---";
const CURRENT_FOLDER: &str = "current";

// ---- Sort policy ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Name,
    Date,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Name => "name",
            SortBy::Date => "date",
        }
    }

    /// Exact match only; anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(SortBy::Name),
            "date" => Some(SortBy::Date),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---- Parsed configuration ----

/// One search/creation target: where notes live and how its button looks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Category {
    /// Folder prefix, either `""` (vault root) or ending with `/`
    pub path: String,
    #[serde(rename = "nameButton", default)]
    pub button_label: String,
    #[serde(rename = "colorButton", default)]
    pub button_text_color: String,
    #[serde(rename = "backgroundButton", default)]
    pub button_background_color: String,
    /// Leading emoji that marks notes of this category
    #[serde(rename = "emoji", default, skip_serializing_if = "Option::is_none")]
    pub emoji_tag: Option<String>,
    #[serde(rename = "pathTemplate", default)]
    pub template_path: String,
}

impl Category {
    /// Text pre-filled in the "new note" prompt.
    pub fn initial_note_name(&self) -> String {
        match self.emoji_tag.as_deref() {
            Some(emoji) if !emoji.is_empty() => format!("{} ", emoji),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockConfig {
    pub title: String,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub categories: Vec<Category>,
}

/// Category record being filled in between two separators.
#[derive(Debug, Default)]
struct CategoryDraft {
    path: Option<String>,
    button_label: Option<String>,
    button_text_color: Option<String>,
    button_background_color: Option<String>,
    emoji_tag: Option<String>,
    template_path: Option<String>,
}

impl CategoryDraft {
    fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.button_label.is_none()
            && self.button_text_color.is_none()
            && self.button_background_color.is_none()
            && self.emoji_tag.is_none()
            && self.template_path.is_none()
    }

    fn set(&mut self, key: &str, value: &str) {
        let slot = match key {
            "path" => &mut self.path,
            "nameButton" => &mut self.button_label,
            "colorButton" => &mut self.button_text_color,
            "backgroundButton" => &mut self.button_background_color,
            "emoji" => &mut self.emoji_tag,
            "pathTemplate" => &mut self.template_path,
            _ => return,
        };
        *slot = Some(value.to_string());
    }

    fn finish(self) -> Category {
        Category {
            path: self.path.map(|p| normalize_folder(&p)).unwrap_or_default(),
            button_label: self.button_label.unwrap_or_default(),
            button_text_color: self.button_text_color.unwrap_or_default(),
            button_background_color: self.button_background_color.unwrap_or_default(),
            emoji_tag: self.emoji_tag,
            template_path: self.template_path.unwrap_or_default(),
        }
    }
}

fn is_current_sentinel(path: &str) -> bool {
    path.eq_ignore_ascii_case(CURRENT_FOLDER)
}

/// Force a trailing `/`, leaving the `current` sentinel untouched.
fn normalize_folder(path: &str) -> String {
    if is_current_sentinel(path) || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Folder of the note that hosts the block: `A/B/Note.md` -> `A/B/`.
pub fn owner_folder(owner_path: Option<&str>) -> String {
    match owner_path.and_then(|p| p.rfind('/').map(|i| &p[..=i])) {
        Some(folder) => folder.to_string(),
        None => String::new(),
    }
}

fn resolve_sentinels(categories: &mut [Category], owner_path: Option<&str>) {
    for category in categories {
        if is_current_sentinel(&category.path) {
            category.path = owner_folder(owner_path);
        }
    }
}

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+):\s*(.+)$").expect("valid property regex"))
}

/// Parse the body of a configuration block.
///
/// Lines before the first `---` set global properties; every `---` opens a
/// new category record. Unknown keys and malformed lines are skipped, and an
/// empty category list falls back to `defaults.config_items`.
pub fn parse_block(source: &str, owner_path: Option<&str>, defaults: &Settings) -> BlockConfig {
    let mut title = None;
    let mut sort_by = None;
    let mut sort_order = None;
    let mut categories = Vec::new();
    let mut draft: Option<CategoryDraft> = None;

    for line in source.lines() {
        let line = line.trim_end_matches('\r');
        if line == RECORD_SEPARATOR {
            if let Some(done) = draft.take().filter(|d| !d.is_empty()) {
                categories.push(done.finish());
            }
            draft = Some(CategoryDraft::default());
            continue;
        }

        let Some(caps) = property_re().captures(line) else {
            continue;
        };
        let key = &caps[1];
        let value = caps[2].trim();
        if value.is_empty() {
            continue;
        }

        match draft.as_mut() {
            Some(record) => record.set(key, value),
            None => match key {
                "title" => title = Some(value.to_string()),
                "sortBy" => sort_by = SortBy::parse(value).or(sort_by),
                "sortOrder" => sort_order = SortOrder::parse(value).or(sort_order),
                _ => {}
            },
        }
    }

    if let Some(done) = draft.filter(|d| !d.is_empty()) {
        categories.push(done.finish());
    }
    if categories.is_empty() {
        categories = defaults.config_items.clone();
    }
    resolve_sentinels(&mut categories, owner_path);

    BlockConfig {
        title: title.unwrap_or_else(|| defaults.title.clone()),
        sort_by: sort_by.unwrap_or(defaults.sort_by),
        sort_order: sort_order.unwrap_or(defaults.sort_order),
        categories,
    }
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?ms)^```{}[ \t]*\r?\n(.*?)^```[ \t]*\r?$",
            BLOCK_LANGUAGE
        ))
        .expect("valid fence regex")
    })
}

/// Bodies of every `dynamicsearch` fence in a markdown note, in order.
pub fn extract_blocks(markdown: &str) -> Vec<String> {
    fence_re()
        .captures_iter(markdown)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Serialize host defaults as a ready-to-insert fenced block.
pub fn render_block(settings: &Settings) -> String {
    let mut lines = block_lines(settings);
    lines.push(String::new());
    lines.push(String::new());
    lines.join("\n")
}

fn block_lines(settings: &Settings) -> Vec<String> {
    let mut lines = vec![
        format!("```{}", BLOCK_LANGUAGE),
        format!("title: {}", settings.title),
        format!("sortBy: {}", settings.sort_by),
        format!("sortOrder: {}", settings.sort_order),
    ];

    for item in &settings.config_items {
        lines.push(RECORD_SEPARATOR.to_string());
        let fields = [
            ("path", Some(item.path.as_str())),
            ("nameButton", Some(item.button_label.as_str())),
            ("colorButton", Some(item.button_text_color.as_str())),
            ("backgroundButton", Some(item.button_background_color.as_str())),
            ("emoji", item.emoji_tag.as_deref()),
            ("pathTemplate", Some(item.template_path.as_str())),
        ];
        for (key, value) in fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                lines.push(format!("{}: {}", key, value));
            }
        }
    }

    lines.push("```".to_string());
    lines
}

/// Text for the "insert block" command and the line the cursor lands on.
pub fn insert_default_block(settings: &Settings, cursor_line: usize) -> (String, usize) {
    let text = render_block(settings);
    let line_count = block_lines(settings).len() + 2;
    (text, cursor_line + line_count)
}
