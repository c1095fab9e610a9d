//! Folding function
//!
//! Each byte `b` is scaled by the descriptor multiplier
//!
//! ```text
//! multiplier(b) = (b * w1 * w2 * w3 * K) / w4      K = 1e-8, w4 = 64
//! ```
//!
//! and combined with the byte's symbol code `c`:
//!
//! ```text
//! quantum(b)  = floor(multiplier(b) * 2^32)
//! output_byte = (quantum(b) + c) mod 256
//! ```
//!
//! The transform is forward-only. Folded bytes are the stored form; there is
//! no inverse.

use crate::error::Result;
use crate::field::FieldDescriptor;
use crate::symbols::SymbolMap;

/// Fixed epsilon `K` of the multiplier.
pub const FOLD_EPSILON: f64 = 0.000_000_01;

/// Fixed divisor `w4` of the multiplier.
pub const FOLD_DIVISOR: f64 = 64.0;

// 2^32: lifts the tiny multiplier into an integer quantum
const QUANTUM_SCALE: f64 = 4_294_967_296.0;

/// Scalar multiplier for one byte value, evaluated left to right in `f64`.
pub fn multiplier(byte: u8, descriptor: &FieldDescriptor) -> f64 {
    let [w1, w2, w3, _, _] = descriptor.widths();
    f64::from(byte) * f64::from(w1) * f64::from(w2) * f64::from(w3) * FOLD_EPSILON / FOLD_DIVISOR
}

/// Integer quantum of a byte's multiplier.
pub fn quantum(byte: u8, descriptor: &FieldDescriptor) -> u64 {
    (multiplier(byte, descriptor) * QUANTUM_SCALE).floor() as u64
}

/// Fold a single byte given its symbol code.
pub fn fold_byte(byte: u8, code: u32, descriptor: &FieldDescriptor) -> u8 {
    (quantum(byte, descriptor).wrapping_add(u64::from(code)) & 0xFF) as u8
}

/// Low bytes of the quantum for all 256 byte values of one descriptor.
///
/// `(quantum + code) mod 256` only depends on `quantum mod 256`, so the table
/// is all the fold needs once the descriptor is fixed.
#[derive(Clone, Debug)]
pub struct FoldTable {
    low: [u8; 256],
}

impl FoldTable {
    pub fn new(descriptor: &FieldDescriptor) -> Self {
        let mut low = [0u8; 256];
        for (byte, slot) in low.iter_mut().enumerate() {
            *slot = (quantum(byte as u8, descriptor) & 0xFF) as u8;
        }
        FoldTable { low }
    }

    #[inline]
    pub fn fold_byte(&self, byte: u8, code: u32) -> u8 {
        self.low[byte as usize].wrapping_add((code & 0xFF) as u8)
    }

    /// Fold bytes whose symbols are all registered. `None` if any is not.
    pub fn fold_known(&self, bytes: &[u8], symbols: &SymbolMap) -> Option<Vec<u8>> {
        let codes = byte_codes(symbols);
        bytes
            .iter()
            .map(|&b| codes[b as usize].map(|code| self.fold_byte(b, code)))
            .collect()
    }
}

/// Pad `payload`, register each distinct byte as a symbol, and fold block by
/// block.
///
/// # Examples
///
/// ```
/// use xformat::{fold, FieldDescriptor, SymbolMap};
///
/// let field = FieldDescriptor::default();
/// let mut symbols = SymbolMap::default();
/// let folded = fold(b"AB", &field, &mut symbols).unwrap();
/// assert_eq!(folded, vec![61, 150, 2, 2, 2, 2]);
/// ```
pub fn fold(payload: &[u8], descriptor: &FieldDescriptor, symbols: &mut SymbolMap) -> Result<Vec<u8>> {
    let table = FoldTable::new(descriptor);
    let padded = descriptor.pad(payload);
    register_bytes(&padded, symbols)?;
    Ok(fold_blocks(&padded, descriptor, &table, symbols))
}

/// Register every distinct byte of `bytes` as a one-byte symbol, in order of
/// first appearance. All or nothing.
pub(crate) fn register_bytes(bytes: &[u8], symbols: &mut SymbolMap) -> Result<usize> {
    let mut seen = [false; 256];
    let mut distinct: Vec<&[u8]> = Vec::new();
    for byte in bytes {
        if !seen[*byte as usize] {
            seen[*byte as usize] = true;
            distinct.push(std::slice::from_ref(byte));
        }
    }
    symbols.register_all(distinct)
}

/// Fold padded bytes whose symbols are already registered.
pub(crate) fn fold_blocks(
    padded: &[u8],
    descriptor: &FieldDescriptor,
    table: &FoldTable,
    symbols: &SymbolMap,
) -> Vec<u8> {
    let codes = byte_codes(symbols);
    let mut out = Vec::with_capacity(padded.len());
    for block in padded.chunks(descriptor.block_size_bytes()) {
        out.extend(block.iter().map(|&b| {
            // registered by the caller; unknown bytes would fold with code 0
            let code = codes[b as usize].unwrap_or(0);
            table.fold_byte(b, code)
        }));
    }
    out
}

/// Codes of the 256 one-byte symbols, where registered.
pub(crate) fn byte_codes(symbols: &SymbolMap) -> [Option<u32>; 256] {
    let mut codes = [None; 256];
    for (byte, slot) in codes.iter_mut().enumerate() {
        *slot = symbols.lookup(&[byte as u8]);
    }
    codes
}
