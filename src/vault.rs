use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::error::{Error, Result};

/// A markdown note as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    /// Vault-relative path with `/` separators, e.g. `Notes/📝 Alpha.md`
    pub path: String,
    /// Display name, usually the file stem
    pub basename: String,
    /// Last modified timestamp (unix seconds)
    pub mtime: i64,
}

impl Document {
    pub fn new(path: impl Into<String>, mtime: i64) -> Self {
        let path = path.into();
        let basename = basename_of(&path);
        Self {
            path,
            basename,
            mtime,
        }
    }

    pub fn is_markdown(&self) -> bool {
        self.path.ends_with(".md")
    }
}

/// `Folder/Note.md` -> `Note`
pub fn basename_of(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => name[..dot].to_string(),
        _ => name.to_string(),
    }
}

/// Change notifications delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    Created(String),
    Deleted(String),
    Renamed { from: String, to: String },
    Modified(String),
    /// Active document switched (None when nothing is open)
    ActiveDocumentChanged(Option<String>),
}

/// Storage capabilities the search widget and note creator rely on.
#[async_trait]
pub trait Vault: Send + Sync + 'static {
    async fn list_documents(&self) -> Result<Vec<Document>>;

    /// Read content, possibly served from a cache.
    async fn cached_read(&self, doc: &Document) -> Result<String>;

    /// Read content straight from storage.
    async fn read(&self, doc: &Document) -> Result<String>;

    async fn document(&self, path: &str) -> Option<Document>;

    async fn exists(&self, path: &str) -> bool;

    async fn create_folder(&self, path: &str) -> Result<()>;

    async fn create(&self, path: &str, content: &str) -> Result<Document>;

    async fn modify(&self, doc: &Document, content: &str) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent>;
}

/// Values handed to a template engine when a new note is expanded.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub title: String,
    pub path: String,
    pub basename: String,
    pub name: String,
    pub creation_date: DateTime<Local>,
    /// `dd/mm/yyyy HH:MM`
    pub now: String,
    /// `dd/mm/yyyy`
    pub today: String,
}

impl TemplateContext {
    pub fn new(title: &str, doc: &Document, created: DateTime<Local>) -> Self {
        let name = doc.path.rsplit('/').next().unwrap_or(&doc.path).to_string();
        Self {
            title: title.to_string(),
            path: doc.path.clone(),
            basename: doc.basename.clone(),
            name,
            creation_date: created,
            now: created.format("%d/%m/%Y %H:%M").to_string(),
            today: created.format("%d/%m/%Y").to_string(),
        }
    }
}

/// Third-party template processing (`<% ... %>` code).
#[async_trait]
pub trait TemplateExpander: Send + Sync {
    async fn expand(&self, ctx: &TemplateContext, content: &str) -> Result<String>;
}

// ---- In-memory vault ----

#[derive(Debug, Clone)]
struct Entry {
    mtime: i64,
    content: String,
}

/// A `Vault` kept entirely in memory, handy for embedding and tests.
pub struct MemoryVault {
    files: RwLock<BTreeMap<String, Entry>>,
    folders: RwLock<Vec<String>>,
    events: broadcast::Sender<VaultEvent>,
}

impl Default for MemoryVault {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            files: RwLock::new(BTreeMap::new()),
            folders: RwLock::new(Vec::new()),
            events,
        }
    }
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a note and announce the change.
    pub fn insert(&self, path: &str, content: &str, mtime: i64) {
        let existed = {
            let mut files = self.files.write().expect("vault write lock");
            files
                .insert(
                    path.to_string(),
                    Entry {
                        mtime,
                        content: content.to_string(),
                    },
                )
                .is_some()
        };
        let event = if existed {
            VaultEvent::Modified(path.to_string())
        } else {
            VaultEvent::Created(path.to_string())
        };
        let _ = self.events.send(event);
    }

    pub fn remove(&self, path: &str) {
        let removed = self
            .files
            .write()
            .expect("vault write lock")
            .remove(path)
            .is_some();
        if removed {
            let _ = self.events.send(VaultEvent::Deleted(path.to_string()));
        }
    }

    pub fn rename(&self, from: &str, to: &str) {
        let moved = {
            let mut files = self.files.write().expect("vault write lock");
            match files.remove(from) {
                Some(entry) => {
                    files.insert(to.to_string(), entry);
                    true
                }
                None => false,
            }
        };
        if moved {
            let _ = self.events.send(VaultEvent::Renamed {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
    }

    /// Forward an arbitrary host event, e.g. the active document switching.
    pub fn notify(&self, event: VaultEvent) {
        let _ = self.events.send(event);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files
            .read()
            .expect("vault read lock")
            .get(path)
            .map(|e| e.content.clone())
    }

    fn lookup(&self, path: &str) -> Result<Entry> {
        self.files
            .read()
            .expect("vault read lock")
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }
}

fn now_unix_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl Vault for MemoryVault {
    async fn list_documents(&self) -> Result<Vec<Document>> {
        let files = self.files.read().expect("vault read lock");
        Ok(files
            .iter()
            .filter(|(path, _)| path.ends_with(".md"))
            .map(|(path, entry)| Document::new(path.clone(), entry.mtime))
            .collect())
    }

    async fn cached_read(&self, doc: &Document) -> Result<String> {
        self.read(doc).await
    }

    async fn read(&self, doc: &Document) -> Result<String> {
        Ok(self.lookup(&doc.path)?.content)
    }

    async fn document(&self, path: &str) -> Option<Document> {
        self.lookup(path)
            .ok()
            .map(|entry| Document::new(path, entry.mtime))
    }

    async fn exists(&self, path: &str) -> bool {
        let path = path.trim_end_matches('/');
        if self.files.read().expect("vault read lock").contains_key(path) {
            return true;
        }
        let prefix = format!("{}/", path);
        self.folders
            .read()
            .expect("vault read lock")
            .iter()
            .any(|f| f == path)
            || self
                .files
                .read()
                .expect("vault read lock")
                .keys()
                .any(|k| k.starts_with(&prefix))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        self.folders
            .write()
            .expect("vault write lock")
            .push(path.trim_end_matches('/').to_string());
        Ok(())
    }

    async fn create(&self, path: &str, content: &str) -> Result<Document> {
        if self.files.read().expect("vault read lock").contains_key(path) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let mtime = now_unix_secs();
        self.insert(path, content, mtime);
        Ok(Document::new(path, mtime))
    }

    async fn modify(&self, doc: &Document, content: &str) -> Result<()> {
        self.lookup(&doc.path)?;
        self.insert(&doc.path, content, now_unix_secs());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_basename_of() {
        assert_eq!(basename_of("Notes/📝 Alpha.md"), "📝 Alpha");
        assert_eq!(basename_of("Readme"), "Readme");
        assert_eq!(basename_of("a/v1.2 notes.md"), "v1.2 notes");
        assert_eq!(basename_of(".hidden"), ".hidden");
    }

    #[tokio::test]
    async fn test_memory_vault_crud_and_events() {
        let vault = MemoryVault::new();
        let mut rx = vault.subscribe();

        let doc = vault.create("Notes/a.md", "hello").await.unwrap();
        assert_eq!(doc.basename, "a");
        assert_eq!(rx.recv().await.unwrap(), VaultEvent::Created("Notes/a.md".to_string()));

        assert!(matches!(
            vault.create("Notes/a.md", "again").await,
            Err(Error::AlreadyExists(_))
        ));

        vault.modify(&doc, "changed").await.unwrap();
        assert_eq!(vault.read(&doc).await.unwrap(), "changed");
        assert_eq!(rx.recv().await.unwrap(), VaultEvent::Modified("Notes/a.md".to_string()));

        assert!(vault.exists("Notes").await);
        assert!(vault.exists("Notes/").await);
        assert!(!vault.exists("Other").await);

        vault.remove("Notes/a.md");
        assert!(matches!(vault.read(&doc).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_only_markdown() {
        let vault = MemoryVault::new();
        vault.insert("a.md", "", 1);
        vault.insert("img.png", "", 1);
        let docs = vault.list_documents().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "a.md");
    }

    #[test]
    fn test_template_context_dates() {
        let created = Local.with_ymd_and_hms(2025, 3, 7, 9, 5, 0).unwrap();
        let doc = Document::new("Ideas/💡 Plan.md", 0);
        let ctx = TemplateContext::new("💡 Plan", &doc, created);
        assert_eq!(ctx.now, "07/03/2025 09:05");
        assert_eq!(ctx.today, "07/03/2025");
        assert_eq!(ctx.name, "💡 Plan.md");
        assert_eq!(ctx.basename, "💡 Plan");
    }
}
