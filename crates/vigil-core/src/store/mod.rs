// ── Entity store ──
//
// In-memory keyed storage with pluggable write admission and
// per-subscriber change notification.

mod collection;
mod data_store;
mod flow;
mod loader;

pub use collection::EntityCollection;
pub use data_store::{DataStore, Loaders};
pub use flow::{DefaultFlow, Flow, TagFlow};
pub use loader::{Loader, PersistentWriter};
