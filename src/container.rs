//! Container - named payload bound to the shared descriptor and symbol map
//!
//! A container does not own its field descriptor or symbol map; it holds
//! shared references to the context's instances plus its own payload buffer.
//! On disk it is a `.x` file:
//!
//! ```text
//! magic "XCN1" | version u16 | symbols u8 | reserved u8 | widths 5×u16 | reserved [6]
//! [table_len u32 | bincode(SymbolSnapshot)]      only when symbols == embedded
//! payload_len u64 | payload
//! sha256 of everything above (32 bytes)
//! ```

use crate::disk::{read_locked, resolve_path, validate_id, write_atomic, FileLock, X_EXTENSION};
use crate::error::{Result, XError};
use crate::field::FieldDescriptor;
use crate::pipeline::XContext;
use crate::symbols::{SharedSymbols, SymbolSnapshot};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub const CONTAINER_MAGIC: &[u8; 4] = b"XCN1";
pub const CONTAINER_VERSION: u16 = 1;
pub const CONTAINER_HEADER_SIZE: usize = 24;
const CHECKSUM_SIZE: usize = 32;

/// Id of the container that carries the persisted symbol session.
pub const SESSION_ID: &str = "session";

/// How a persisted container refers to its symbol table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolSection {
    /// Codes refer to the external shared table (the session).
    Reference = 0,
    /// A snapshot of the table is stored inside the container.
    Embedded = 1,
}

impl SymbolSection {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SymbolSection::Reference),
            1 => Some(SymbolSection::Embedded),
            _ => None,
        }
    }
}

/// Fixed-size container header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub symbols: SymbolSection,
    pub widths: [u16; 5],
}

impl ContainerHeader {
    pub fn to_bytes(&self) -> [u8; CONTAINER_HEADER_SIZE] {
        let mut bytes = [0u8; CONTAINER_HEADER_SIZE];
        bytes[0..4].copy_from_slice(CONTAINER_MAGIC);
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        bytes[6] = self.symbols as u8;
        // bytes[7] reserved
        for (slot, width) in bytes[8..18].chunks_exact_mut(2).zip(self.widths) {
            slot.copy_from_slice(&width.to_le_bytes());
        }
        // bytes[18..24] reserved
        bytes
    }

    pub fn from_bytes(bytes: &[u8; CONTAINER_HEADER_SIZE]) -> std::result::Result<Self, String> {
        if &bytes[0..4] != CONTAINER_MAGIC {
            return Err("invalid container magic".into());
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != CONTAINER_VERSION {
            return Err(format!("unsupported container version {version}"));
        }
        let symbols = SymbolSection::from_u8(bytes[6])
            .ok_or_else(|| format!("unknown symbol section tag {}", bytes[6]))?;
        let mut widths_raw = [0u8; 10];
        widths_raw.copy_from_slice(&bytes[8..18]);
        Ok(ContainerHeader {
            version,
            symbols,
            widths: FieldDescriptor::widths_from_le_bytes(&widths_raw),
        })
    }
}

/// Named payload plus shared descriptor and symbol map.
///
/// # Examples
///
/// ```
/// use xformat::{Container, XContext};
///
/// let ctx = XContext::default();
/// let mut cnt = Container::new("notes", &ctx);
/// cnt.set_payload(ctx.create(b"hello").unwrap());
/// assert_eq!(cnt.id(), "notes");
/// assert_eq!(cnt.payload().len(), 6);
/// ```
#[derive(Clone, Debug)]
pub struct Container {
    id: String,
    descriptor: Arc<FieldDescriptor>,
    symbols: SharedSymbols,
    payload: Vec<u8>,
}

impl Container {
    pub fn new(id: impl Into<String>, ctx: &XContext) -> Self {
        Container {
            id: id.into(),
            descriptor: ctx.descriptor_handle(),
            symbols: Arc::clone(ctx.symbols()),
            payload: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    pub fn symbols(&self) -> &SharedSymbols {
        &self.symbols
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Store bytes as-is, typically the output of [`XContext::create`].
    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Serialize to the `.x` container format.
    pub fn to_bytes(&self, section: SymbolSection) -> Result<Vec<u8>> {
        let header = ContainerHeader {
            version: CONTAINER_VERSION,
            symbols: section,
            widths: self.descriptor.widths(),
        };
        let mut out = Vec::with_capacity(CONTAINER_HEADER_SIZE + self.payload.len() + 64);
        out.extend_from_slice(&header.to_bytes());

        if section == SymbolSection::Embedded {
            let table = bincode::serialize(&self.symbols.read().snapshot())?;
            let table_len = u32::try_from(table.len())
                .map_err(|_| XError::Serialization("symbol table exceeds 4 GiB".into()))?;
            out.extend_from_slice(&table_len.to_le_bytes());
            out.extend_from_slice(&table);
        }

        out.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.payload);

        let checksum = Sha256::digest(&out);
        out.extend_from_slice(&checksum);
        Ok(out)
    }

    /// Parse a `.x` container and bind it to `ctx`.
    ///
    /// The header widths must match the context descriptor. An embedded
    /// symbol table is absorbed into the context's shared map.
    pub fn from_bytes(id: impl Into<String>, bytes: &[u8], ctx: &XContext) -> Result<Self> {
        let id = id.into();
        let corrupt = |reason: String| XError::corrupt(format!("container '{id}'"), reason);

        if bytes.len() < CONTAINER_HEADER_SIZE + 8 + CHECKSUM_SIZE {
            return Err(corrupt(format!("{} bytes is too short", bytes.len())));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(corrupt("checksum mismatch".into()));
        }

        let mut header_raw = [0u8; CONTAINER_HEADER_SIZE];
        header_raw.copy_from_slice(&body[..CONTAINER_HEADER_SIZE]);
        let header = ContainerHeader::from_bytes(&header_raw).map_err(corrupt)?;
        if header.widths != ctx.descriptor().widths() {
            return Err(XError::DescriptorMismatch {
                expected: ctx.descriptor().widths(),
                found: header.widths,
            });
        }

        let mut cursor = Cursor::new(&body[CONTAINER_HEADER_SIZE..]);
        let snapshot = match header.symbols {
            SymbolSection::Reference => None,
            SymbolSection::Embedded => {
                let table_len = cursor.u32().ok_or_else(|| corrupt("truncated table length".into()))?;
                let table = cursor
                    .take(table_len as usize)
                    .ok_or_else(|| corrupt("truncated symbol table".into()))?;
                Some(bincode::deserialize::<SymbolSnapshot>(table)?)
            }
        };
        let payload_len = cursor.u64().ok_or_else(|| corrupt("truncated payload length".into()))?;
        let payload = usize::try_from(payload_len)
            .ok()
            .and_then(|len| cursor.take(len))
            .ok_or_else(|| corrupt("truncated payload".into()))?;
        if !cursor.is_empty() {
            return Err(corrupt("trailing bytes after payload".into()));
        }

        if let Some(snapshot) = snapshot {
            ctx.absorb(&snapshot)?;
        }

        let mut container = Container::new(id, ctx);
        container.payload = payload.to_vec();
        Ok(container)
    }

    /// Atomically write `<dir>/<id>.x`.
    pub fn persist(&self, dir: &Path, section: SymbolSection) -> Result<PathBuf> {
        validate_id(&self.id)?;
        self.write_to(resolve_path(dir, &self.id), section)
    }

    fn write_to(&self, path: PathBuf, section: SymbolSection) -> Result<PathBuf> {
        let bytes = self.to_bytes(section)?;
        let _lock = FileLock::exclusive(&path)?;
        write_atomic(&path, &bytes)?;
        info!(id = %self.id, bytes = bytes.len(), ?section, "persisted container");
        Ok(path)
    }

    /// Load `<dir>/<id>.x` and bind it to `ctx`.
    pub fn load(dir: &Path, id: &str, ctx: &XContext) -> Result<Self> {
        validate_id(id)?;
        Self::read_from(dir, id, ctx)
    }

    fn read_from(dir: &Path, id: &str, ctx: &XContext) -> Result<Self> {
        let path = resolve_path(dir, id);
        let bytes = read_locked(&path, || format!("container '{id}'"))?;
        let logical = id.strip_suffix(".x").unwrap_or(id);
        Container::from_bytes(logical, &bytes, ctx).map_err(|e| {
            if let XError::Corrupt { .. } = e {
                warn!(path = %path.display(), error = %e, "rejected container");
            }
            e
        })
    }
}

/// Ids of the `.x` files directly inside `dir`, sorted.
pub fn list_containers(dir: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| XError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(X_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            ids.push(stem.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Persist the shared symbol table as the payload-less `session` container.
pub fn save_session(ctx: &XContext, dir: &Path) -> Result<PathBuf> {
    Container::new(SESSION_ID, ctx).write_to(resolve_path(dir, SESSION_ID), SymbolSection::Embedded)
}

/// Absorb a previously saved session into `ctx`. No-op when none exists.
pub fn load_session(ctx: &XContext, dir: &Path) -> Result<bool> {
    match Container::read_from(dir, SESSION_ID, ctx) {
        Ok(_) => Ok(true),
        Err(XError::NotFound { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Bounds-checked little-endian reader over a byte slice.
pub(crate) struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len)?;
        let slice = self.bytes.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    pub(crate) fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Some(u32::from_le_bytes(raw))
    }

    pub(crate) fn u64(&mut self) -> Option<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Some(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn header_round_trip() {
        let header = ContainerHeader {
            version: CONTAINER_VERSION,
            symbols: SymbolSection::Embedded,
            widths: [8, 8, 8, 8, 16],
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], b"XCN1");
        assert_eq!(ContainerHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn header_rejects_unknown_section() {
        let mut bytes = ContainerHeader {
            version: CONTAINER_VERSION,
            symbols: SymbolSection::Reference,
            widths: [8, 8, 8, 8, 16],
        }
        .to_bytes();
        bytes[6] = 9;
        assert!(ContainerHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn embedded_table_restores_codes_in_fresh_context() {
        let ctx = XContext::default();
        let mut cnt = Container::new("doc", &ctx);
        cnt.set_payload(ctx.create(b"xyz").unwrap());
        let bytes = cnt.to_bytes(SymbolSection::Embedded).unwrap();

        let fresh = XContext::default();
        let loaded = Container::from_bytes("doc", &bytes, &fresh).unwrap();
        assert_eq!(loaded.payload(), cnt.payload());
        assert_eq!(fresh.snapshot(), ctx.snapshot());
        assert_eq!(fresh.create(b"xyz").unwrap(), cnt.payload());
    }

    #[test]
    fn reference_section_carries_no_table() {
        let ctx = XContext::default();
        let mut cnt = Container::new("doc", &ctx);
        cnt.set_payload(ctx.create(b"xyz").unwrap());
        let bytes = cnt.to_bytes(SymbolSection::Reference).unwrap();
        assert_eq!(bytes.len(), CONTAINER_HEADER_SIZE + 8 + 6 + CHECKSUM_SIZE);

        let fresh = XContext::default();
        Container::from_bytes("doc", &bytes, &fresh).unwrap();
        assert_eq!(fresh.symbol_count(), 0);
    }

    #[test]
    fn flipped_byte_is_detected() {
        let ctx = XContext::default();
        let mut cnt = Container::new("doc", &ctx);
        cnt.set_payload(vec![1, 2, 3]);
        let mut bytes = cnt.to_bytes(SymbolSection::Reference).unwrap();
        bytes[CONTAINER_HEADER_SIZE + 9] ^= 0xFF;
        let err = Container::from_bytes("doc", &bytes, &ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn descriptor_mismatch_is_rejected() {
        let ctx = XContext::default();
        let bytes = Container::new("doc", &ctx).to_bytes(SymbolSection::Reference).unwrap();
        let other = XContext::new(FieldDescriptor::new([16, 8, 8, 8, 8]).unwrap(), 16);
        assert!(matches!(
            Container::from_bytes("doc", &bytes, &other),
            Err(XError::DescriptorMismatch { .. })
        ));
    }

    #[test]
    fn session_id_is_reserved_for_the_symbol_table() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = XContext::default();
        ctx.create(b"kept").unwrap();
        save_session(&ctx, dir.path()).unwrap();

        let mut cnt = Container::new(SESSION_ID, &ctx);
        cnt.set_payload(b"overwrite".to_vec());
        let err = cnt.persist(dir.path(), SymbolSection::Reference).unwrap_err();
        assert!(matches!(err, XError::InvalidStoreId { .. }));
        assert!(Container::load(dir.path(), "session.x", &ctx).is_err());

        let fresh = XContext::default();
        assert!(load_session(&fresh, dir.path()).unwrap());
        assert_eq!(fresh.snapshot(), ctx.snapshot());
    }

    #[test]
    fn loading_a_missing_session_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fresh-root");
        assert!(!load_session(&XContext::default(), &root).unwrap());
        assert!(!root.exists());
    }

    #[test]
    fn cursor_is_bounds_checked() {
        let mut cursor = Cursor::new(&[1, 0, 0]);
        assert_eq!(cursor.u16(), Some(1));
        assert_eq!(cursor.u16(), None);
        assert_eq!(cursor.offset(), 2);
        assert_eq!(cursor.take(1), Some(&[0u8][..]));
        assert!(cursor.is_empty());
    }
}
