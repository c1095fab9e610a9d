//! Row stores built on the pipeline
//!
//! Both tables live in `.x` files under a store root:
//!
//! ```text
//! magic "XRW1" | version u16 | kind u8 | reserved u8 | widths 5×u16 | reserved [6]
//! record*: record_len u32 | field_count u16 | (field_len u32 | field)*
//! ```
//!
//! Fields are stored in folded form (the output of `create`), except the
//! settings key, which is kept as its padded bytes so rows match on identity.
//! Writers hold an exclusive lock on the store's sidecar lock file, readers a
//! shared one.

pub mod conversation;
pub mod settings;

use crate::container::Cursor;
use crate::error::{Result, XError};
use crate::field::FieldDescriptor;
use std::path::Path;
use tracing::warn;

pub use conversation::{ConversationLog, ConversationRow, ConversationRows, ConversationTable};
pub use settings::{SettingRow, SettingsTable};

pub const STORE_MAGIC: &[u8; 4] = b"XRW1";
pub const STORE_VERSION: u16 = 1;
pub const STORE_HEADER_SIZE: usize = 24;

/// Which table a store file belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StoreKind {
    Conversation = 1,
    Settings = 2,
}

impl StoreKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(StoreKind::Conversation),
            2 => Some(StoreKind::Settings),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            StoreKind::Conversation => "conversation store",
            StoreKind::Settings => "settings store",
        }
    }
}

pub(crate) fn header_bytes(kind: StoreKind, descriptor: &FieldDescriptor) -> [u8; STORE_HEADER_SIZE] {
    let mut bytes = [0u8; STORE_HEADER_SIZE];
    bytes[0..4].copy_from_slice(STORE_MAGIC);
    bytes[4..6].copy_from_slice(&STORE_VERSION.to_le_bytes());
    bytes[6] = kind as u8;
    bytes[8..18].copy_from_slice(&descriptor.to_le_bytes());
    bytes
}

/// Validate the header and return the record region.
pub(crate) fn split_header<'a>(
    bytes: &'a [u8],
    kind: StoreKind,
    descriptor: &FieldDescriptor,
    path: &Path,
) -> Result<&'a [u8]> {
    if bytes.len() < STORE_HEADER_SIZE {
        return Err(corrupt(path, format!("{} byte header is truncated", bytes.len())));
    }
    let (header, records) = bytes.split_at(STORE_HEADER_SIZE);
    if &header[0..4] != STORE_MAGIC {
        return Err(corrupt(path, "invalid store magic"));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != STORE_VERSION {
        return Err(corrupt(path, format!("unsupported store version {version}")));
    }
    match StoreKind::from_u8(header[6]) {
        Some(found) if found == kind => {}
        Some(found) => {
            return Err(corrupt(
                path,
                format!("expected a {}, found a {}", kind.label(), found.label()),
            ))
        }
        None => return Err(corrupt(path, format!("unknown store kind {}", header[6]))),
    }
    let mut widths_raw = [0u8; 10];
    widths_raw.copy_from_slice(&header[8..18]);
    let found = FieldDescriptor::widths_from_le_bytes(&widths_raw);
    if found != descriptor.widths() {
        return Err(XError::DescriptorMismatch {
            expected: descriptor.widths(),
            found,
        });
    }
    Ok(records)
}

/// Encode one length-prefixed record.
pub(crate) fn encode_record<F: AsRef<[u8]>>(fields: &[F]) -> Result<Vec<u8>> {
    let field_count = u16::try_from(fields.len())
        .map_err(|_| XError::Serialization(format!("{} fields exceed a record", fields.len())))?;
    let mut body = Vec::new();
    body.extend_from_slice(&field_count.to_le_bytes());
    for field in fields {
        let field = field.as_ref();
        let len = u32::try_from(field.len())
            .map_err(|_| XError::Serialization("field exceeds 4 GiB".into()))?;
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(field);
    }
    let record_len = u32::try_from(body.len())
        .map_err(|_| XError::Serialization("record exceeds 4 GiB".into()))?;

    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&record_len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode the record starting at `*offset`, advancing past it.
///
/// `Ok(None)` at a clean end of the region. Any truncation or length
/// inconsistency is corruption.
pub(crate) fn next_record<'a>(
    records: &'a [u8],
    offset: &mut usize,
    path: &Path,
) -> Result<Option<Vec<&'a [u8]>>> {
    let rest = records.get(*offset..).unwrap_or_default();
    if rest.is_empty() {
        return Ok(None);
    }
    let at = *offset;
    let mut cursor = Cursor::new(rest);
    let record_len = cursor
        .u32()
        .ok_or_else(|| corrupt(path, format!("truncated record length at offset {at}")))?;
    let body = cursor
        .take(record_len as usize)
        .ok_or_else(|| corrupt(path, format!("truncated record at offset {at}")))?;

    let mut fields_cursor = Cursor::new(body);
    let field_count = fields_cursor
        .u16()
        .ok_or_else(|| corrupt(path, format!("record at offset {at} has no field count")))?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for index in 0..field_count {
        let field = fields_cursor
            .u32()
            .and_then(|len| fields_cursor.take(len as usize))
            .ok_or_else(|| corrupt(path, format!("field {index} overruns record at offset {at}")))?;
        fields.push(field);
    }
    if !fields_cursor.is_empty() {
        return Err(corrupt(path, format!("record at offset {at} has trailing bytes")));
    }

    *offset += cursor.offset();
    Ok(Some(fields))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> XError {
    let err = XError::corrupt(path, reason);
    warn!(error = %err, "store corruption detected");
    err
}
