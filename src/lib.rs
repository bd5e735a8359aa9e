//! Live note search and template-based note creation for markdown vaults.
//!
//! A `dynamicsearch` block inside a note is parsed into a [`BlockConfig`];
//! a [`SearchWidget`] then keeps a ranked, highlighted list of related notes
//! up to date while the vault changes, and creates new notes from the
//! block's categories.

pub mod block;
pub mod create;
pub mod error;
pub mod fs_vault;
pub mod natural;
pub mod normalize;
pub mod search;
pub mod settings;
pub mod snippet;
pub mod vault;
pub mod widget;

pub use block::{
    extract_blocks, insert_default_block, parse_block, BlockConfig, Category, SortBy, SortOrder,
};
pub use create::{CreatedNote, NoteCreator};
pub use error::{Error, Result};
pub use fs_vault::FsVault;
pub use natural::natural_cmp;
pub use normalize::normalize_text;
pub use search::{emoji_tag, search, SearchMode, SearchRequest, SearchResult};
pub use settings::Settings;
pub use snippet::{extract_window, highlight, render_preview};
pub use vault::{Document, MemoryVault, TemplateContext, TemplateExpander, Vault, VaultEvent};
pub use widget::{on_config_block, HostContext, Notice, SearchWidget, WidgetView, SEARCH_DEBOUNCE};
