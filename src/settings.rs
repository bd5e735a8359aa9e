use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::block::{Category, SortBy, SortOrder};

/// Host-level defaults used when a block leaves something out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub title: String,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
    pub config_items: Vec<Category>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            title: "Search:".to_string(),
            sort_by: SortBy::Name,
            sort_order: SortOrder::Asc,
            config_items: vec![Category {
                path: "Notes/".to_string(),
                button_label: "➕ Add Note".to_string(),
                button_text_color: "#ffffff".to_string(),
                button_background_color: "#814ae8".to_string(),
                emoji_tag: Some("📝".to_string()),
                template_path: "templates/default.md".to_string(),
            }],
        }
    }
}

impl Settings {
    /// Load settings from disk, falling back to defaults if the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Settings {
        if !path.exists() {
            return Settings::default();
        }

        match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
        {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring unreadable settings at {}: {}", path.display(), e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }
}
