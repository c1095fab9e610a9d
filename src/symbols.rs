//! Symbol Map - growing table of stable symbol codes
//!
//! Every distinct byte sequence gets the next sequential code the first time
//! it is seen. Codes are never reassigned or removed, so for the lifetime of a
//! map identical symbols always resolve to identical codes.

use crate::error::{Result, XError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Default upper bound on the number of registered symbols.
pub const DEFAULT_MAX_SYMBOLS: usize = 65_536;

/// Version tag written into every [`SymbolSnapshot`].
pub const SNAPSHOT_VERSION: u16 = 1;

/// A symbol map shared between contexts, containers and stores.
pub type SharedSymbols = Arc<RwLock<SymbolMap>>;

/// Serializable copy of a symbol table, symbols listed in code order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub version: u16,
    pub symbols: Vec<Vec<u8>>,
}

/// Insertion-ordered symbol -> code table.
///
/// # Examples
///
/// ```
/// use xformat::SymbolMap;
///
/// let mut map = SymbolMap::new(16);
/// assert_eq!(map.lookup_or_register(b"A").unwrap(), 0);
/// assert_eq!(map.lookup_or_register(b"B").unwrap(), 1);
/// assert_eq!(map.lookup_or_register(b"A").unwrap(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct SymbolMap {
    codes: HashMap<Vec<u8>, u32>,
    symbols: Vec<Vec<u8>>,
    max_symbols: usize,
}

impl Default for SymbolMap {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SYMBOLS)
    }
}

impl SymbolMap {
    pub fn new(max_symbols: usize) -> Self {
        SymbolMap {
            codes: HashMap::new(),
            symbols: Vec::new(),
            max_symbols: max_symbols.min(u32::MAX as usize),
        }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn max_symbols(&self) -> usize {
        self.max_symbols
    }

    /// Code of a registered symbol.
    pub fn lookup(&self, symbol: &[u8]) -> Option<u32> {
        self.codes.get(symbol).copied()
    }

    /// Symbol registered under `code`.
    pub fn symbol(&self, code: u32) -> Option<&[u8]> {
        self.symbols.get(code as usize).map(Vec::as_slice)
    }

    /// Returns the existing code for `symbol`, registering it first if needed.
    pub fn lookup_or_register(&mut self, symbol: &[u8]) -> Result<u32> {
        if let Some(code) = self.lookup(symbol) {
            return Ok(code);
        }
        if self.symbols.len() >= self.max_symbols {
            return Err(XError::Capacity {
                limit: self.max_symbols,
            });
        }
        Ok(self.push(symbol.to_vec()))
    }

    /// Registers a batch of symbols, all or nothing.
    ///
    /// Returns how many symbols were new. If the new symbols do not fit, the
    /// map is left untouched and `Capacity` is returned.
    pub fn register_all<'a, I>(&mut self, symbols: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut fresh: Vec<&[u8]> = Vec::new();
        for symbol in symbols {
            if !self.codes.contains_key(symbol) && !fresh.contains(&symbol) {
                fresh.push(symbol);
            }
        }
        if self.symbols.len() + fresh.len() > self.max_symbols {
            return Err(XError::Capacity {
                limit: self.max_symbols,
            });
        }
        for symbol in &fresh {
            self.push(symbol.to_vec());
        }
        Ok(fresh.len())
    }

    /// Iterate `(code, symbol)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.symbols
            .iter()
            .enumerate()
            .map(|(code, symbol)| (code as u32, symbol.as_slice()))
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        SymbolSnapshot {
            version: SNAPSHOT_VERSION,
            symbols: self.symbols.clone(),
        }
    }

    /// Rebuild a map from a snapshot.
    pub fn from_snapshot(snapshot: &SymbolSnapshot, max_symbols: usize) -> Result<Self> {
        let mut map = SymbolMap::new(max_symbols);
        map.absorb(snapshot)?;
        Ok(map)
    }

    /// Merge a snapshot into this map.
    ///
    /// One table must be a prefix of the other, since codes are assigned in
    /// first-seen order. Symbols past the common prefix are appended. On any
    /// divergence the map is left unchanged.
    pub fn absorb(&mut self, snapshot: &SymbolSnapshot) -> Result<usize> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(XError::Serialization(format!(
                "unsupported symbol snapshot version {}",
                snapshot.version
            )));
        }
        let shared = self.symbols.len().min(snapshot.symbols.len());
        for (code, (ours, theirs)) in self.symbols.iter().zip(&snapshot.symbols).enumerate() {
            if ours != theirs {
                return Err(XError::SymbolDivergence { code: code as u32 });
            }
        }

        let extra = &snapshot.symbols[shared..];
        let mut seen = std::collections::HashSet::new();
        for (offset, symbol) in extra.iter().enumerate() {
            if self.codes.contains_key(symbol) || !seen.insert(symbol.as_slice()) {
                return Err(XError::SymbolDivergence {
                    code: (shared + offset) as u32,
                });
            }
        }
        if self.symbols.len() + extra.len() > self.max_symbols {
            return Err(XError::Capacity {
                limit: self.max_symbols,
            });
        }

        for symbol in extra {
            self.push(symbol.clone());
        }
        Ok(extra.len())
    }

    fn push(&mut self, symbol: Vec<u8>) -> u32 {
        let code = self.symbols.len() as u32;
        self.codes.insert(symbol.clone(), code);
        self.symbols.push(symbol);
        code
    }
}
