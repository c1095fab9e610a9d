//! Field Descriptor - fixed five-slot block layout
//!
//! The descriptor holds five bit widths. Their sum is the canonical block
//! size: payloads are zero-padded up to a whole number of blocks before they
//! are folded, and longer payloads are processed block by block.

use crate::error::{Result, XError};
use serde::{Deserialize, Serialize};

/// Default widths in bits: three 8-bit lanes feeding the fold multiplier,
/// then an 8-bit and a 16-bit lane.
pub const DEFAULT_WIDTHS: [u16; 5] = [8, 8, 8, 8, 16];

/// Immutable block layout shared by every pipeline call.
///
/// # Examples
///
/// ```
/// use xformat::FieldDescriptor;
///
/// let field = FieldDescriptor::default();
/// assert_eq!(field.block_size_bits(), 48);
/// assert_eq!(field.pad(b"AB"), b"AB\0\0\0\0".to_vec());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[u16; 5]", into = "[u16; 5]")]
pub struct FieldDescriptor {
    widths: [u16; 5],
}

impl Default for FieldDescriptor {
    fn default() -> Self {
        FieldDescriptor {
            widths: DEFAULT_WIDTHS,
        }
    }
}

impl TryFrom<[u16; 5]> for FieldDescriptor {
    type Error = XError;

    fn try_from(widths: [u16; 5]) -> Result<Self> {
        Self::new(widths)
    }
}

impl From<FieldDescriptor> for [u16; 5] {
    fn from(field: FieldDescriptor) -> Self {
        field.widths
    }
}

impl FieldDescriptor {
    /// Every width must be non-zero and the total must be whole bytes.
    pub fn new(widths: [u16; 5]) -> Result<Self> {
        if widths.contains(&0) {
            return Err(XError::InvalidDescriptor {
                widths,
                reason: "widths must be non-zero",
            });
        }
        let bits: u32 = widths.iter().map(|&w| u32::from(w)).sum();
        if bits % 8 != 0 {
            return Err(XError::InvalidDescriptor {
                widths,
                reason: "total width must be a multiple of 8 bits",
            });
        }
        Ok(FieldDescriptor { widths })
    }

    pub fn widths(&self) -> [u16; 5] {
        self.widths
    }

    pub fn block_size_bits(&self) -> u32 {
        self.widths.iter().map(|&w| u32::from(w)).sum()
    }

    pub fn block_size_bytes(&self) -> usize {
        (self.block_size_bits() / 8) as usize
    }

    /// Length after padding: the next whole number of blocks, at least one.
    pub fn padded_len(&self, len: usize) -> usize {
        let block = self.block_size_bytes();
        len.div_ceil(block).max(1) * block
    }

    /// Right-pad with zero bytes to [`padded_len`](Self::padded_len).
    pub fn pad(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.padded_len(bytes.len()));
        out.extend_from_slice(bytes);
        out.resize(self.padded_len(bytes.len()), 0);
        out
    }

    /// Little-endian wire form used by container and store headers.
    pub(crate) fn to_le_bytes(self) -> [u8; 10] {
        let mut out = [0u8; 10];
        for (slot, width) in out.chunks_exact_mut(2).zip(self.widths) {
            slot.copy_from_slice(&width.to_le_bytes());
        }
        out
    }

    pub(crate) fn widths_from_le_bytes(bytes: &[u8; 10]) -> [u16; 5] {
        let mut widths = [0u16; 5];
        for (width, pair) in widths.iter_mut().zip(bytes.chunks_exact(2)) {
            *width = u16::from_le_bytes([pair[0], pair[1]]);
        }
        widths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_block_is_six_bytes() {
        let field = FieldDescriptor::default();
        assert_eq!(field.widths(), [8, 8, 8, 8, 16]);
        assert_eq!(field.block_size_bytes(), 6);
    }

    #[test]
    fn padding_never_truncates() {
        let field = FieldDescriptor::default();
        assert_eq!(field.padded_len(0), 6);
        assert_eq!(field.padded_len(6), 6);
        assert_eq!(field.padded_len(7), 12);

        let long = vec![0xAB; 13];
        let padded = field.pad(&long);
        assert_eq!(padded.len(), 18);
        assert_eq!(&padded[..13], &long[..]);
        assert!(padded[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_bad_widths() {
        assert!(matches!(
            FieldDescriptor::new([8, 0, 8, 8, 16]),
            Err(XError::InvalidDescriptor { .. })
        ));
        assert!(matches!(
            FieldDescriptor::new([8, 8, 8, 8, 3]),
            Err(XError::InvalidDescriptor { .. })
        ));
        assert_eq!(
            FieldDescriptor::new([16, 16, 16, 8, 8]).unwrap().block_size_bytes(),
            8
        );
    }

    #[test]
    fn wire_form_round_trips() {
        let field = FieldDescriptor::new([4, 4, 8, 16, 32]).unwrap();
        let bytes = field.to_le_bytes();
        assert_eq!(FieldDescriptor::widths_from_le_bytes(&bytes), field.widths());
    }

    #[test]
    fn serde_validates_widths() {
        let ok: FieldDescriptor = serde_json::from_str("[8,8,8,8,16]").unwrap();
        assert_eq!(ok, FieldDescriptor::default());
        assert!(serde_json::from_str::<FieldDescriptor>("[8,8,8,8,0]").is_err());
    }
}
