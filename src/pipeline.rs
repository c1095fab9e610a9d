//! Pipeline - the shared encoding context and its entry points
//!
//! [`XContext`] bundles the field descriptor, the symbol map and the fold
//! table. It is cheap to clone; clones share the same symbol map, and every
//! symbol registration goes through the map's single write lock so the
//! "A == A" identity rule holds under concurrent callers.

use crate::config::EngineConfig;
use crate::error::{Result, XError};
use crate::field::FieldDescriptor;
use crate::fold::{byte_codes, fold_blocks, register_bytes, FoldTable};
use crate::symbols::{SharedSymbols, SymbolMap, SymbolSnapshot, DEFAULT_MAX_SYMBOLS};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

/// Anything a front end may hand to the engine.
///
/// Only [`Input::Bytes`] is accepted; the other variants exist so callers
/// holding text or numbers get a typed `InputKind` failure instead of an
/// implicit encoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Input<'a> {
    Bytes(&'a [u8]),
    Text(&'a str),
    Numbers(&'a [f64]),
}

impl<'a> Input<'a> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Input::Bytes(_) => "bytes",
            Input::Text(_) => "text",
            Input::Numbers(_) => "numbers",
        }
    }

    /// The byte payload, or `InputKind` for anything else.
    pub fn bytes(self) -> Result<&'a [u8]> {
        match self {
            Input::Bytes(bytes) => Ok(bytes),
            other => Err(XError::InputKind {
                found: other.kind_name(),
            }),
        }
    }
}

impl<'a> From<&'a [u8]> for Input<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Input::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Input<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Input::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Input<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Input::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Input<'a> {
    fn from(text: &'a str) -> Self {
        Input::Text(text)
    }
}

impl<'a> From<&'a String> for Input<'a> {
    fn from(text: &'a String) -> Self {
        Input::Text(text)
    }
}

impl<'a> From<&'a [f64]> for Input<'a> {
    fn from(numbers: &'a [f64]) -> Self {
        Input::Numbers(numbers)
    }
}

/// Shared encoding context.
///
/// # Examples
///
/// ```
/// use xformat::XContext;
///
/// let ctx = XContext::default();
/// let first = ctx.create(b"AB").unwrap();
/// let second = ctx.create(b"AB").unwrap();
/// assert_eq!(first, second);
/// assert!(ctx.create("AB").is_err());
/// ```
#[derive(Clone, Debug)]
pub struct XContext {
    descriptor: Arc<FieldDescriptor>,
    symbols: SharedSymbols,
    table: Arc<FoldTable>,
}

impl Default for XContext {
    fn default() -> Self {
        Self::new(FieldDescriptor::default(), DEFAULT_MAX_SYMBOLS)
    }
}

impl XContext {
    pub fn new(descriptor: FieldDescriptor, max_symbols: usize) -> Self {
        Self::with_symbols(descriptor, Arc::new(RwLock::new(SymbolMap::new(max_symbols))))
    }

    /// Build a context around an existing shared symbol map.
    pub fn with_symbols(descriptor: FieldDescriptor, symbols: SharedSymbols) -> Self {
        XContext {
            table: Arc::new(FoldTable::new(&descriptor)),
            descriptor: Arc::new(descriptor),
            symbols,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self::new(config.descriptor()?, config.max_symbols))
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    pub fn descriptor_handle(&self) -> Arc<FieldDescriptor> {
        Arc::clone(&self.descriptor)
    }

    pub fn symbols(&self) -> &SharedSymbols {
        &self.symbols
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.read().len()
    }

    /// Validate, pad, and register every distinct byte.
    ///
    /// Returns the padded, unfolded bytes.
    pub fn normalize_and_register<'a>(&self, input: impl Into<Input<'a>>) -> Result<Vec<u8>> {
        let bytes = input.into().bytes()?;
        let padded = self.descriptor.pad(bytes);
        let fresh = register_bytes(&padded, &mut self.symbols.write())?;
        if fresh > 0 {
            debug!(fresh, "registered new symbols");
        }
        Ok(padded)
    }

    /// Replace each registered byte by the low byte of its code; unknown
    /// bytes pass through. No padding, no folding.
    pub fn light_output<'a>(&self, input: impl Into<Input<'a>>) -> Result<Vec<u8>> {
        let bytes = input.into().bytes()?;
        let codes = byte_codes(&self.symbols.read());
        Ok(bytes
            .iter()
            .map(|&b| match codes[b as usize] {
                Some(code) => (code & 0xFF) as u8,
                None => b,
            })
            .collect())
    }

    /// Alias of [`light_output`](Self::light_output) under its boundary name.
    pub fn output<'a>(&self, input: impl Into<Input<'a>>) -> Result<Vec<u8>> {
        self.light_output(input)
    }

    /// Normalize, register and fold: the durable stored representation.
    pub fn create<'a>(&self, input: impl Into<Input<'a>>) -> Result<Vec<u8>> {
        let bytes = input.into().bytes()?;
        let padded = self.descriptor.pad(bytes);

        let mut symbols = self.symbols.write();
        let fresh = register_bytes(&padded, &mut symbols)?;
        let folded = fold_blocks(&padded, &self.descriptor, &self.table, &symbols);
        drop(symbols);

        trace!(input_len = bytes.len(), folded_len = folded.len(), fresh, "create");
        Ok(folded)
    }

    /// [`create`](Self::create) for several fields at once.
    ///
    /// Every field is validated first, and all their symbols are registered
    /// in one batch under one write lock. A capacity failure therefore
    /// registers nothing for any field.
    pub fn create_fields<'a, I>(&self, fields: I) -> Result<Vec<Vec<u8>>>
    where
        I: IntoIterator,
        I::Item: Into<Input<'a>>,
    {
        let padded = fields
            .into_iter()
            .map(|field| field.into().bytes().map(|bytes| self.descriptor.pad(bytes)))
            .collect::<Result<Vec<_>>>()?;

        let mut symbols = self.symbols.write();
        let fresh = register_bytes(&padded.concat(), &mut symbols)?;
        let folded = padded
            .iter()
            .map(|field| fold_blocks(field, &self.descriptor, &self.table, &symbols))
            .collect();
        drop(symbols);

        trace!(fields = padded.len(), fresh, "create_fields");
        Ok(folded)
    }

    /// Fold `bytes` without padding or registration.
    ///
    /// `None` when some byte has never been registered, which means no stored
    /// field can contain it.
    pub fn fold_existing(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        self.table.fold_known(bytes, &self.symbols.read())
    }

    pub fn snapshot(&self) -> SymbolSnapshot {
        self.symbols.read().snapshot()
    }

    /// Merge a persisted symbol table into the shared map.
    pub fn absorb(&self, snapshot: &SymbolSnapshot) -> Result<usize> {
        let added = self.symbols.write().absorb(snapshot)?;
        if added > 0 {
            debug!(added, "absorbed symbols from snapshot");
        }
        Ok(added)
    }
}
