use chrono::Local;
use std::sync::Arc;

use crate::block::Category;
use crate::error::{Error, Result};
use crate::vault::{Document, TemplateContext, TemplateExpander, Vault};

/// A freshly created note and where the cursor should land.
#[derive(Debug, Clone)]
pub struct CreatedNote {
    pub document: Document,
    pub cursor_line: usize,
}

/// Replace characters that are not allowed in file names.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '\u{00A0}' && *c != '\u{FEFF}')
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `Notes/` + `📝 Alpha` -> `Notes/📝 Alpha.md`
pub fn note_path(category: &Category, note_name: &str) -> String {
    let name = sanitize_filename(note_name);
    let file_name = if name.ends_with(".md") {
        name
    } else {
        format!("{}.md", name)
    };
    format!("{}{}", category.path, file_name)
}

/// Paths tried when resolving a template; a bare name also tries `.md`.
fn template_candidates(template_path: &str) -> Vec<String> {
    if template_path.contains('.') {
        vec![template_path.to_string()]
    } else {
        vec![format!("{}.md", template_path), template_path.to_string()]
    }
}

fn has_template_code(content: &str) -> bool {
    content.contains("<%") && content.contains("%>")
}

/// Number of the last line once the note ends with an empty line.
fn ensure_trailing_blank_line(content: &str) -> (Option<String>, usize) {
    let padded = if content.ends_with("\n\n") {
        None
    } else {
        Some(format!("{}\n\n", content))
    };
    let lines = padded.as_deref().unwrap_or(content).split('\n').count();
    (padded, lines - 1)
}

/// Creates notes for a category, optionally from a template.
pub struct NoteCreator<V: Vault + ?Sized> {
    vault: Arc<V>,
    expander: Option<Arc<dyn TemplateExpander>>,
}

impl<V: Vault + ?Sized> Clone for NoteCreator<V> {
    fn clone(&self) -> Self {
        Self {
            vault: Arc::clone(&self.vault),
            expander: self.expander.clone(),
        }
    }
}

impl<V: Vault + ?Sized> NoteCreator<V> {
    pub fn new(vault: Arc<V>) -> Self {
        Self {
            vault,
            expander: None,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn TemplateExpander>) -> Self {
        self.set_expander(expander);
        self
    }

    pub fn set_expander(&mut self, expander: Arc<dyn TemplateExpander>) {
        self.expander = Some(expander);
    }

    /// Template body for `category`, or `None` when there is no usable
    /// template. Lookup problems never abort creation.
    async fn load_template(&self, category: &Category) -> Option<String> {
        let template_path = category.template_path.trim();
        if template_path.is_empty() {
            tracing::debug!("No template configured, creating empty note");
            return None;
        }

        let mut template = None;
        for candidate in template_candidates(template_path) {
            if let Some(doc) = self.vault.document(&candidate).await {
                template = Some(doc);
                break;
            }
        }
        let Some(doc) = template.filter(Document::is_markdown) else {
            tracing::warn!("Template '{}' not found", template_path);
            return None;
        };

        match self.vault.read(&doc).await {
            Ok(content) if content.trim().is_empty() => None,
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!("Failed to read template {}: {}", doc.path, e);
                None
            }
        }
    }

    /// Create `note_name` inside the category folder.
    pub async fn create(&self, note_name: &str, category: &Category) -> Result<CreatedNote> {
        let title = note_name.trim();
        let path = note_path(category, title);
        tracing::debug!(%path, "creating note");

        let content = self.load_template(category).await;
        let expand = content.as_deref().map_or(false, has_template_code);

        let folder = category.path.trim_end_matches('/');
        if !folder.is_empty() && !self.vault.exists(folder).await {
            self.vault.create_folder(folder).await?;
        }
        if self.vault.exists(&path).await {
            return Err(Error::AlreadyExists(path));
        }

        let document = self
            .vault
            .create(&path, content.as_deref().unwrap_or(""))
            .await?;

        if expand {
            if let Some(expander) = &self.expander {
                if let Err(e) = self.expand(expander.as_ref(), title, &document).await {
                    tracing::error!("Template processing failed for {}: {}", document.path, e);
                }
            }
        }

        let current = self.vault.read(&document).await?;
        let (padded, cursor_line) = ensure_trailing_blank_line(&current);
        if let Some(padded) = padded {
            self.vault.modify(&document, &padded).await?;
        }

        Ok(CreatedNote {
            document,
            cursor_line,
        })
    }

    async fn expand(&self, expander: &dyn TemplateExpander, title: &str, doc: &Document) -> Result<()> {
        let ctx = TemplateContext::new(title, doc, Local::now());
        let raw = self.vault.read(doc).await?;
        let expanded = expander.expand(&ctx, &raw).await?;
        if expanded != raw {
            self.vault.modify(doc, &expanded).await?;
        }
        Ok(())
    }
}
