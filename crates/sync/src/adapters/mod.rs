//! Target adapters and the registry that builds them.

mod codex;
mod gemini;
mod opencode;
pub mod registry;
pub mod traits;
pub(crate) mod utils;

pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;
pub use opencode::OpenCodeAdapter;
pub use registry::{AdapterFactory, AdapterRegistry, RegistryError};
pub use traits::{overlay_items, panic_message, sync_categories, ItemView, TargetAdapter};
