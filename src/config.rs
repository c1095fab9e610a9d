//! Engine configuration, persisted as JSON.

use crate::error::Result;
use crate::field::{FieldDescriptor, DEFAULT_WIDTHS};
use crate::symbols::DEFAULT_MAX_SYMBOLS;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Default directory holding containers and row stores.
pub const DEFAULT_STORE_ROOT: &str = "xdata";

/// Settings for one engine instance.
///
/// Missing fields fall back to their defaults, so a partial JSON file such as
/// `{"max_symbols": 1024}` is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Field descriptor widths in bits.
    pub widths: [u16; 5],
    /// Upper bound on registered symbols.
    pub max_symbols: usize,
    /// Directory for `.x` containers and row stores.
    pub store_root: PathBuf,
    /// Embed the symbol table in persisted containers instead of referencing
    /// the shared session table.
    pub embed_symbols: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            widths: DEFAULT_WIDTHS,
            max_symbols: DEFAULT_MAX_SYMBOLS,
            store_root: PathBuf::from(DEFAULT_STORE_ROOT),
            embed_symbols: true,
        }
    }
}

impl EngineConfig {
    /// Validated descriptor for the configured widths.
    pub fn descriptor(&self) -> Result<FieldDescriptor> {
        FieldDescriptor::new(self.widths)
    }

    /// Load configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(BufReader::new(file))?;
        config.descriptor()?;
        Ok(config)
    }

    /// Save configuration as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
