//! Notes: storage, prompt context, and keyword fallback.

pub mod context;
pub mod fallback;
pub mod store;

pub use store::{NoteStore, Notes, StoreError};
