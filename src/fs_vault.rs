use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::vault::{Document, Vault, VaultEvent};

/// Events for the same path closer together than this are dropped.
const EVENT_DEBOUNCE: Duration = Duration::from_millis(500);

/// File identity checked before a cached body is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified_nanos: u128,
    len: u64,
}

impl Stamp {
    fn of(metadata: &std::fs::Metadata) -> Self {
        let modified_nanos = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            modified_nanos,
            len: metadata.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedNote {
    stamp: Stamp,
    content: String,
}

type NoteCache = Arc<RwLock<HashMap<String, CachedNote>>>;
type DebounceMap = Arc<Mutex<HashMap<PathBuf, Instant>>>;

/// A vault backed by a folder of markdown files.
pub struct FsVault {
    root: PathBuf,
    cache: NoteCache,
    events: broadcast::Sender<VaultEvent>,
    debounce_map: DebounceMap,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

fn modified_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "md")
}

/// Vault-relative path with `/` separators.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

impl FsVault {
    /// Open (and create if needed) the vault folder.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .map_err(|e| Error::io(root.display().to_string(), e))?;
        }
        let root = root.canonicalize().unwrap_or(root);
        let (events, _) = broadcast::channel(256);

        Ok(Self {
            root,
            cache: Arc::new(RwLock::new(HashMap::new())),
            events,
            debounce_map: Arc::new(Mutex::new(HashMap::new())),
            watcher: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_end_matches('/'))
    }

    /// Forward a host event such as the active document switching.
    pub fn notify(&self, event: VaultEvent) {
        let _ = self.events.send(event);
    }

    /// Start delivering filesystem changes to subscribers.
    pub fn watch(&self) -> Result<()> {
        let root = self.root.clone();
        let events = self.events.clone();
        let cache = Arc::clone(&self.cache);
        let debounce_map = Arc::clone(&self.debounce_map);

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for vault_event in apply_raw_event(&root, &event, &debounce_map, &cache) {
                        let _ = events.send(vault_event);
                    }
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        tracing::info!("Watching {}", self.root.display());
        *self.watcher.lock().expect("file watcher mutex") = Some(watcher);
        Ok(())
    }

    fn remember(&self, path: &str, stamp: Stamp, content: &str) {
        let mut cache = self.cache.write().expect("cache write lock");
        cache.insert(
            path.to_string(),
            CachedNote {
                stamp,
                content: content.to_string(),
            },
        );
    }

    async fn metadata(&self, path: &str) -> Result<std::fs::Metadata> {
        fs::metadata(self.full_path(path))
            .await
            .map_err(|e| Error::io(path, e))
    }
}

fn invalidate(cache: &NoteCache, event: &VaultEvent) {
    let mut cache = cache.write().expect("cache write lock");
    match event {
        VaultEvent::Created(p) | VaultEvent::Deleted(p) | VaultEvent::Modified(p) => {
            cache.remove(p);
        }
        VaultEvent::Renamed { from, to } => {
            cache.remove(from);
            cache.remove(to);
        }
        VaultEvent::ActiveDocumentChanged(_) => {}
    }
}

/// True when `path` fired less than `EVENT_DEBOUNCE` ago.
fn debounced(map: &DebounceMap, path: &Path) -> bool {
    let mut map = map.lock().expect("debounce map mutex");
    let now = Instant::now();

    if map.len() > 100 {
        map.retain(|_, last| now.duration_since(*last) < Duration::from_secs(5));
    }
    if let Some(last) = map.get(path) {
        if now.duration_since(*last) < EVENT_DEBOUNCE {
            return true;
        }
    }
    map.insert(path.to_path_buf(), now);
    false
}

/// Drop cached bodies for every markdown path the raw event touches, then
/// translate it. Invalidation runs before debouncing so a suppressed
/// `Modified` never leaves a stale body behind.
fn apply_raw_event(
    root: &Path,
    event: &notify::Event,
    debounce_map: &DebounceMap,
    cache: &NoteCache,
) -> Vec<VaultEvent> {
    {
        let mut cached = cache.write().expect("cache write lock");
        for path in event.paths.iter().filter(|p| is_markdown(p)) {
            if let Some(rel) = relative_path(root, path) {
                cached.remove(&rel);
            }
        }
    }

    let events = translate_event(root, event, debounce_map);
    for vault_event in &events {
        invalidate(cache, vault_event);
    }
    events
}

fn translate_event(root: &Path, event: &notify::Event, debounce_map: &DebounceMap) -> Vec<VaultEvent> {
    let rel = |p: &PathBuf| relative_path(root, p);

    if let EventKind::Modify(ModifyKind::Name(RenameMode::Both)) = event.kind {
        if let [from, to] = event.paths.as_slice() {
            if is_markdown(from) || is_markdown(to) {
                if let (Some(from), Some(to)) = (rel(from), rel(to)) {
                    return vec![VaultEvent::Renamed { from, to }];
                }
            }
        }
        return Vec::new();
    }

    let mut out = Vec::new();
    for path in event.paths.iter().filter(|p| is_markdown(p)) {
        let Some(rel_path) = rel(path) else { continue };
        let vault_event = match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                VaultEvent::Created(rel_path)
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                VaultEvent::Deleted(rel_path)
            }
            EventKind::Modify(_) => {
                if debounced(debounce_map, path) {
                    continue;
                }
                VaultEvent::Modified(rel_path)
            }
            _ => continue,
        };
        out.push(vault_event);
    }
    out
}

#[async_trait]
impl Vault for FsVault {
    async fn list_documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| Error::io(dir.display().to_string(), e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::io(dir.display().to_string(), e))?
            {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') {
                    continue;
                }
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                if metadata.is_dir() {
                    pending.push(path);
                } else if is_markdown(&path) {
                    if let Some(rel) = relative_path(&self.root, &path) {
                        documents.push(Document::new(rel, modified_secs(&metadata)));
                    }
                }
            }
        }

        documents.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(documents)
    }

    async fn cached_read(&self, doc: &Document) -> Result<String> {
        let stamp = Stamp::of(&self.metadata(&doc.path).await?);
        {
            let cache = self.cache.read().expect("cache read lock");
            if let Some(hit) = cache.get(&doc.path).filter(|c| c.stamp == stamp) {
                return Ok(hit.content.clone());
            }
        }
        let content = self.read(doc).await?;
        self.remember(&doc.path, stamp, &content);
        Ok(content)
    }

    async fn read(&self, doc: &Document) -> Result<String> {
        fs::read_to_string(self.full_path(&doc.path))
            .await
            .map_err(|e| Error::io(doc.path.as_str(), e))
    }

    async fn document(&self, path: &str) -> Option<Document> {
        let metadata = fs::metadata(self.full_path(path)).await.ok()?;
        metadata
            .is_file()
            .then(|| Document::new(path, modified_secs(&metadata)))
    }

    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(self.full_path(path)).await.unwrap_or(false)
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| Error::io(path, e))
    }

    async fn create(&self, path: &str, content: &str) -> Result<Document> {
        if self.exists(path).await {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(path, e))?;
        }
        fs::write(&full, content)
            .await
            .map_err(|e| Error::io(path, e))?;

        let metadata = self.metadata(path).await?;
        self.remember(path, Stamp::of(&metadata), content);
        Ok(Document::new(path, modified_secs(&metadata)))
    }

    async fn modify(&self, doc: &Document, content: &str) -> Result<()> {
        fs::write(self.full_path(&doc.path), content)
            .await
            .map_err(|e| Error::io(doc.path.as_str(), e))?;
        let metadata = self.metadata(&doc.path).await?;
        self.remember(&doc.path, Stamp::of(&metadata), content);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.events.subscribe()
    }
}
