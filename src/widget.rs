use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::block::{parse_block, BlockConfig, Category};
use crate::create::{CreatedNote, NoteCreator};
use crate::search::{available_tags, search, SearchMode, SearchRequest, SearchResult};
use crate::settings::Settings;
use crate::snippet::render_preview;
use crate::vault::{Document, TemplateExpander, Vault, VaultEvent};

/// Quiet period after the last keystroke before a search runs.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// What the host knows when it asks for a block to be rendered.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    /// Path of the note that contains the block
    pub source_path: Option<String>,
    /// Document open in the editor
    pub active: Option<Document>,
    pub settings: Settings,
}

// ---- View model ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ButtonView {
    pub index: usize,
    pub label: String,
    pub text_color: String,
    pub background_color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultItem {
    pub path: String,
    pub basename: String,
    pub is_backlink: bool,
    /// `… highlighted snippet …` for content matches
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WidgetView {
    pub title: String,
    pub buttons: Vec<ButtonView>,
    pub tags: Vec<String>,
    pub selected_tag: Option<String>,
    pub counter: String,
    pub items: Vec<ResultItem>,
    pub empty_message: Option<String>,
}

/// Single user-facing message produced by note creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Created(String),
    Failed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Created(name) => write!(f, "Note \"{}\" created", name),
            Notice::Failed(message) => write!(f, "Error creating note: {}", message),
        }
    }
}

fn buttons_for(categories: &[Category]) -> Vec<ButtonView> {
    categories
        .iter()
        .enumerate()
        .map(|(index, c)| ButtonView {
            index,
            label: c.button_label.clone(),
            text_color: c.button_text_color.clone(),
            background_color: c.button_background_color.clone(),
        })
        .collect()
}

fn counter_text(count: usize, filtering: bool) -> String {
    match count {
        0 if filtering => "No matches found".to_string(),
        0 => "Start typing to search".to_string(),
        1 => "1 result".to_string(),
        n => format!("{} results", n),
    }
}

// ---- Widget ----

#[derive(Default)]
struct WidgetState {
    search_text: String,
    selected_tag: Option<String>,
    active_path: Option<String>,
    pending: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

/// One rendered configuration block: a live result list plus creation
/// buttons.
pub struct SearchWidget<V: Vault + ?Sized> {
    vault: Arc<V>,
    config: BlockConfig,
    current: Option<Document>,
    creator: NoteCreator<V>,
    state: Mutex<WidgetState>,
    generation: AtomicU64,
    view: watch::Sender<WidgetView>,
}

impl<V: Vault + ?Sized> SearchWidget<V> {
    pub fn new(vault: Arc<V>, source: &str, host: HostContext) -> Self {
        let config = parse_block(source, host.source_path.as_deref(), &host.settings);
        let initial = WidgetView {
            title: config.title.clone(),
            buttons: buttons_for(&config.categories),
            counter: "Searching...".to_string(),
            ..WidgetView::default()
        };
        let (view, _) = watch::channel(initial);

        Self {
            creator: NoteCreator::new(Arc::clone(&vault)),
            vault,
            config,
            state: Mutex::new(WidgetState {
                active_path: host.active.as_ref().map(|d| d.path.clone()),
                ..WidgetState::default()
            }),
            current: host.active,
            generation: AtomicU64::new(0),
            view,
        }
    }

    pub fn with_expander(mut self, expander: Arc<dyn TemplateExpander>) -> Self {
        self.creator.set_expander(expander);
        self
    }

    pub fn config(&self) -> &BlockConfig {
        &self.config
    }

    /// Live view updates.
    pub fn view(&self) -> watch::Receiver<WidgetView> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> WidgetView {
        self.view.borrow().clone()
    }

    pub fn search_text(&self) -> String {
        self.state.lock().expect("widget state mutex").search_text.clone()
    }

    /// Run a pass with the current inputs and publish it unless a newer pass
    /// started meanwhile.
    pub async fn refresh(&self) -> Option<WidgetView> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (query, tag) = {
            let state = self.state.lock().expect("widget state mutex");
            (state.search_text.clone(), state.selected_tag.clone())
        };
        self.view.send_modify(|v| v.counter = "Searching...".to_string());

        let current = self.current.as_ref();
        let tags = available_tags(self.vault.as_ref(), &self.config.categories, current).await;
        let request = SearchRequest {
            query: &query,
            emoji_tag: tag.as_deref(),
            categories: &self.config.categories,
            current,
            sort_by: self.config.sort_by,
            sort_order: self.config.sort_order,
        };
        let results = search(self.vault.as_ref(), &request).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "search pass superseded");
            return None;
        }

        let view = self.build_view(&query, tag, tags, &results);
        self.view.send_replace(view.clone());
        Some(view)
    }

    fn build_view(
        &self,
        query: &str,
        tag: Option<String>,
        tags: Vec<String>,
        results: &[SearchResult],
    ) -> WidgetView {
        let mode = SearchMode::select(query, tag.as_deref(), self.current.as_ref());
        let filtering = !matches!(mode, SearchMode::Backlinks(_));

        let items = results
            .iter()
            .map(|r| ResultItem {
                path: r.document.path.clone(),
                basename: r.document.basename.clone(),
                is_backlink: r.is_backlink,
                preview: match &mode {
                    SearchMode::Text(filter) if r.matches_content => {
                        render_preview(&r.content, filter)
                    }
                    _ => None,
                },
            })
            .collect();

        WidgetView {
            title: self.config.title.clone(),
            buttons: buttons_for(&self.config.categories),
            tags,
            selected_tag: tag,
            counter: counter_text(results.len(), filtering),
            items,
            empty_message: (results.is_empty() && filtering)
                .then(|| "No matches found".to_string()),
        }
    }

    /// Search for `text` right away.
    pub async fn run_search(&self, text: impl Into<String>) -> Option<WidgetView> {
        self.state.lock().expect("widget state mutex").search_text = text.into();
        self.refresh().await
    }

    pub async fn select_tag(&self, tag: Option<String>) -> Option<WidgetView> {
        self.state.lock().expect("widget state mutex").selected_tag =
            tag.filter(|t| !t.is_empty());
        self.refresh().await
    }

    /// React to a vault change. Searches re-run only while the note hosting
    /// the block is the active one.
    pub async fn handle_event(&self, event: &VaultEvent) -> Option<WidgetView> {
        let is_active = {
            let mut state = self.state.lock().expect("widget state mutex");
            if let VaultEvent::ActiveDocumentChanged(path) = event {
                state.active_path = path.clone();
            }
            state.active_path.as_deref() == self.current.as_ref().map(|d| d.path.as_str())
        };
        if !is_active {
            return None;
        }
        self.refresh().await
    }

    /// Suggested name for the "new note" prompt of a category.
    pub fn initial_note_name(&self, category_index: usize) -> String {
        self.config
            .categories
            .get(category_index)
            .map(Category::initial_note_name)
            .unwrap_or_default()
    }

    /// Create a note for the category behind button `category_index`.
    ///
    /// Blank names are ignored. Failures come back as a notice instead of an
    /// error.
    pub async fn create_note(&self, category_index: usize, name: &str) -> Option<Notice> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let Some(category) = self.config.categories.get(category_index) else {
            return Some(Notice::Failed(format!("no category #{}", category_index)));
        };

        match self.creator.create(name, category).await {
            Ok(CreatedNote { document, .. }) => {
                tracing::info!("Created {}", document.path);
                self.refresh().await;
                Some(Notice::Created(name.to_string()))
            }
            Err(e) => {
                tracing::error!("Failed to create note '{}': {}", name, e);
                Some(Notice::Failed(e.to_string()))
            }
        }
    }
}

impl<V: Vault + ?Sized> SearchWidget<V> {
    /// Debounced search: only the last call inside `SEARCH_DEBOUNCE` fires.
    pub fn on_input(self: &Arc<Self>, text: impl Into<String>) {
        let text = text.into();
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(SEARCH_DEBOUNCE).await;
            if let Some(widget) = weak.upgrade() {
                widget.run_search(text).await;
            }
        });

        let mut state = self.state.lock().expect("widget state mutex");
        if let Some(previous) = state.pending.replace(task) {
            previous.abort();
        }
    }

    /// Follow vault events until the widget is dropped.
    pub fn listen(self: &Arc<Self>) {
        let mut events = self.vault.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    // missed events: refresh as if something changed
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "vault events lagged");
                        VaultEvent::Modified(String::new())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(widget) = weak.upgrade() else { break };
                widget.handle_event(&event).await;
            }
        });

        let mut state = self.state.lock().expect("widget state mutex");
        if let Some(previous) = state.listener.replace(task) {
            previous.abort();
        }
    }
}

impl<V: Vault + ?Sized> Drop for SearchWidget<V> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            for task in [state.pending.take(), state.listener.take()].into_iter().flatten() {
                task.abort();
            }
        }
    }
}

/// Render entry point: build the widget for a block, show the initial
/// (backlink) results and start following vault changes.
pub async fn on_config_block<V: Vault + ?Sized>(
    vault: Arc<V>,
    source: &str,
    host: HostContext,
) -> Arc<SearchWidget<V>> {
    let widget = Arc::new(SearchWidget::new(vault, source, host));
    widget.refresh().await;
    widget.listen();
    widget
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::MemoryVault;
    use pretty_assertions::assert_eq;

    const BLOCK: &str = "title: Find\n---\npath: n/\nnameButton: ➕ Note\ncolorButton: #fff\nbackgroundButton: #814ae8\nemoji: 📝\n";

    fn host(active: &str) -> HostContext {
        HostContext {
            source_path: Some(active.to_string()),
            active: Some(Document::new(active, 0)),
            settings: Settings::default(),
        }
    }

    fn seeded() -> Arc<MemoryVault> {
        let vault = Arc::new(MemoryVault::new());
        vault.insert("n/📝 Alpha.md", "hello world, see [[Board]]", 1);
        vault.insert("n/🚀 Beta.md", "hello", 2);
        vault.insert("n/Board.md", "```dynamicsearch\n```", 3);
        vault
    }

    fn basenames(view: &WidgetView) -> Vec<&str> {
        view.items.iter().map(|i| i.basename.as_str()).collect()
    }

    #[test]
    fn test_counter_text() {
        assert_eq!(counter_text(0, true), "No matches found");
        assert_eq!(counter_text(0, false), "Start typing to search");
        assert_eq!(counter_text(1, true), "1 result");
        assert_eq!(counter_text(3, false), "3 results");
    }

    #[tokio::test]
    async fn test_initial_render_shows_backlinks() {
        let widget = on_config_block(seeded(), BLOCK, host("n/Board.md")).await;
        let view = widget.snapshot();

        assert_eq!(view.title, "Find");
        assert_eq!(view.buttons.len(), 1);
        assert_eq!(view.buttons[0].label, "➕ Note");
        assert_eq!(view.tags, vec!["📝".to_string(), "🚀".to_string()]);
        assert_eq!(basenames(&view), vec!["📝 Alpha"]);
        assert!(view.items[0].is_backlink);
        assert_eq!(view.counter, "1 result");
        assert_eq!(view.empty_message, None);
    }

    #[tokio::test]
    async fn test_text_search_with_preview() {
        let widget = on_config_block(seeded(), BLOCK, host("n/Board.md")).await;
        let view = widget.run_search("hello").await.unwrap();

        assert_eq!(basenames(&view), vec!["📝 Alpha", "🚀 Beta"]);
        assert_eq!(view.counter, "2 results");
        assert_eq!(
            view.items[1].preview.as_deref(),
            Some("… <strong>hello</strong> …")
        );

        let view = widget.run_search("zzz").await.unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.counter, "No matches found");
        assert_eq!(view.empty_message.as_deref(), Some("No matches found"));
    }

    #[tokio::test]
    async fn test_tag_selection() {
        let widget = on_config_block(seeded(), BLOCK, host("n/Board.md")).await;
        let view = widget.select_tag(Some("🚀".to_string())).await.unwrap();
        assert_eq!(basenames(&view), vec!["🚀 Beta"]);
        assert_eq!(view.selected_tag.as_deref(), Some("🚀"));
        assert_eq!(view.items[0].preview, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_only_last_input_fires() {
        let widget = Arc::new(SearchWidget::new(seeded(), BLOCK, host("n/Board.md")));

        widget.on_input("wor");
        tokio::time::sleep(Duration::from_millis(100)).await;
        widget.on_input("beta");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(widget.generation.load(Ordering::SeqCst), 0);

        tokio::time::sleep(SEARCH_DEBOUNCE * 2).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(widget.generation.load(Ordering::SeqCst), 1);
        assert_eq!(widget.search_text(), "beta");
        assert_eq!(basenames(&widget.snapshot()), vec!["🚀 Beta"]);
    }

    /// Delegates to a `MemoryVault` but stalls every listing by `delay_ms`.
    struct SlowVault {
        inner: MemoryVault,
        delay_ms: std::sync::atomic::AtomicU64,
    }

    #[async_trait::async_trait]
    impl Vault for SlowVault {
        async fn list_documents(&self) -> crate::Result<Vec<Document>> {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.inner.list_documents().await
        }
        async fn cached_read(&self, doc: &Document) -> crate::Result<String> {
            self.inner.cached_read(doc).await
        }
        async fn read(&self, doc: &Document) -> crate::Result<String> {
            self.inner.read(doc).await
        }
        async fn document(&self, path: &str) -> Option<Document> {
            self.inner.document(path).await
        }
        async fn exists(&self, path: &str) -> bool {
            self.inner.exists(path).await
        }
        async fn create_folder(&self, path: &str) -> crate::Result<()> {
            self.inner.create_folder(path).await
        }
        async fn create(&self, path: &str, content: &str) -> crate::Result<Document> {
            self.inner.create(path, content).await
        }
        async fn modify(&self, doc: &Document, content: &str) -> crate::Result<()> {
            self.inner.modify(doc, content).await
        }
        fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
            self.inner.subscribe()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_pass_is_not_published() {
        let inner = MemoryVault::new();
        inner.insert("n/📝 Alpha.md", "see [[Board]]", 1);
        inner.insert("n/🚀 Beta.md", "hello", 2);
        let vault = Arc::new(SlowVault {
            inner,
            delay_ms: std::sync::atomic::AtomicU64::new(1_000),
        });
        let widget = Arc::new(SearchWidget::new(vault.clone(), BLOCK, host("n/Board.md")));

        let slow = {
            let widget = Arc::clone(&widget);
            tokio::spawn(async move { widget.refresh().await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(widget.generation.load(Ordering::SeqCst), 1);

        vault.delay_ms.store(0, Ordering::SeqCst);
        let fast = widget.run_search("hello").await.unwrap();
        assert_eq!(basenames(&fast), vec!["🚀 Beta"]);

        // the older backlink pass finishes last and must not overwrite
        assert!(slow.await.unwrap().is_none());
        assert_eq!(basenames(&widget.snapshot()), vec!["🚀 Beta"]);
    }

    #[tokio::test]
    async fn test_events_only_while_host_note_active() {
        let vault = seeded();
        let widget = on_config_block(vault.clone(), BLOCK, host("n/Board.md")).await;

        assert!(widget
            .handle_event(&VaultEvent::ActiveDocumentChanged(Some("n/Other.md".into())))
            .await
            .is_none());
        assert!(widget
            .handle_event(&VaultEvent::Modified("n/🚀 Beta.md".into()))
            .await
            .is_none());

        vault.insert("n/Gamma.md", "[[Board|the board]]", 9);
        let view = widget
            .handle_event(&VaultEvent::ActiveDocumentChanged(Some("n/Board.md".into())))
            .await
            .unwrap();
        assert_eq!(basenames(&view), vec!["Gamma", "📝 Alpha"]);
    }

    #[tokio::test]
    async fn test_listener_picks_up_new_notes() {
        let vault = seeded();
        let widget = on_config_block(vault.clone(), BLOCK, host("n/Board.md")).await;
        let mut updates = widget.view();
        updates.borrow_and_update();

        vault.insert("n/Delta.md", "links [[Board]]", 10);
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                updates.changed().await.unwrap();
                if updates.borrow().items.len() == 2 {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(basenames(&widget.snapshot()), vec!["Delta", "📝 Alpha"]);
    }

    #[tokio::test]
    async fn test_create_note_from_button() {
        let vault = seeded();
        let widget = on_config_block(vault.clone(), BLOCK, host("n/Board.md")).await;

        assert_eq!(widget.initial_note_name(0), "📝 ");
        assert_eq!(widget.create_note(0, "   ").await, None);

        let notice = widget.create_note(0, "📝 Gamma").await.unwrap();
        assert_eq!(notice, Notice::Created("📝 Gamma".to_string()));
        assert!(vault.content("n/📝 Gamma.md").is_some());
        assert_eq!(widget.snapshot().tags, vec!["📝".to_string(), "🚀".to_string()]);

        let notice = widget.create_note(0, "📝 Gamma").await.unwrap();
        assert!(matches!(notice, Notice::Failed(_)));
        assert!(notice.to_string().starts_with("Error creating note: "));
    }

    struct TitleExpander;

    #[async_trait::async_trait]
    impl TemplateExpander for TitleExpander {
        async fn expand(
            &self,
            ctx: &crate::vault::TemplateContext,
            content: &str,
        ) -> crate::Result<String> {
            Ok(content.replace("<% tp.file.title %>", &ctx.title))
        }
    }

    #[tokio::test]
    async fn test_create_note_expands_template() {
        let vault = seeded();
        vault.insert("t.md", "# <% tp.file.title %>\n", 4);
        let block = "title: Find\n---\npath: n/\npathTemplate: t\n";
        let widget = Arc::new(
            SearchWidget::new(vault.clone(), block, host("n/Board.md"))
                .with_expander(Arc::new(TitleExpander)),
        );

        let notice = widget.create_note(0, "Plan").await.unwrap();
        assert_eq!(notice, Notice::Created("Plan".to_string()));
        assert_eq!(vault.content("n/Plan.md").unwrap(), "# Plan\n\n\n");
    }

    #[tokio::test]
    async fn test_no_categories_no_buttons() {
        let host = HostContext {
            settings: Settings {
                config_items: vec![],
                ..Settings::default()
            },
            ..HostContext::default()
        };
        let widget = on_config_block(seeded(), "title: Empty", host).await;
        let view = widget.snapshot();
        assert!(view.buttons.is_empty());
        assert!(view.items.is_empty());
        assert_eq!(view.counter, "Start typing to search");
        assert!(matches!(
            widget.create_note(0, "x").await,
            Some(Notice::Failed(_))
        ));
    }
}
