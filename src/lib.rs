//! XFormat - Symbol-Folding Storage Engine
//!
//! Copyright (c) 2025 XFormat Contributors
//! Licensed under MIT License
//!
//! Byte payloads are padded to whole blocks of a field descriptor, every
//! distinct byte is registered in a shared symbol map, and each byte is
//! folded with its symbol code into the durable stored form. On top of the
//! pipeline sit `.x` containers and two row stores: an append-only
//! conversation log and a key-upsert settings table.
//!
//! ```
//! use xformat::XContext;
//!
//! let ctx = XContext::default();
//! assert_eq!(ctx.create(b"AB").unwrap(), vec![61, 150, 2, 2, 2, 2]);
//! ```

pub mod cli;
pub mod config;
pub mod container;
mod disk;
pub mod error;
pub mod field;
pub mod fold;
pub mod pipeline;
pub mod store;
pub mod symbols;

// Re-export main types for convenience
pub use config::{EngineConfig, DEFAULT_STORE_ROOT};
pub use container::{
    list_containers, load_session, save_session, Container, ContainerHeader, SymbolSection,
    SESSION_ID,
};
pub use disk::{resolve_path, X_EXTENSION};
pub use error::{ErrorKind, Result, XError};
pub use field::{FieldDescriptor, DEFAULT_WIDTHS};
pub use fold::{fold, multiplier, quantum, FoldTable};
pub use pipeline::{Input, XContext};
pub use store::conversation::timestamp_now;
pub use store::{
    ConversationLog, ConversationRow, ConversationRows, ConversationTable, SettingRow,
    SettingsTable,
};
pub use symbols::{SharedSymbols, SymbolMap, SymbolSnapshot, DEFAULT_MAX_SYMBOLS};
