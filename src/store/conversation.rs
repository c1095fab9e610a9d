//! Conversation Table - append-only four-column row store
//!
//! Each row holds a timestamp, an attachment, a purpose word and a sentence,
//! each folded independently through the pipeline. Rows are appended and
//! never rewritten.

use super::{encode_record, header_bytes, next_record, split_header, StoreKind, STORE_HEADER_SIZE};
use crate::disk::{read_locked, resolve_path, validate_id, FileLock};
use crate::error::{Result, XError};
use crate::pipeline::{Input, XContext};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const FIELD_COUNT: usize = 4;

/// One conversation row after `light_output` has been applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationRow {
    pub timestamp: Vec<u8>,
    pub attachment: Vec<u8>,
    pub purpose: Vec<u8>,
    pub sentence: Vec<u8>,
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SSZ` bytes.
pub fn timestamp_now() -> Result<Vec<u8>> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    Ok(OffsetDateTime::now_utc().format(&format)?.into_bytes())
}

/// Append-only conversation stores under one root directory.
#[derive(Clone, Debug)]
pub struct ConversationTable {
    ctx: XContext,
    root: PathBuf,
}

impl ConversationTable {
    pub fn new(ctx: XContext, root: impl Into<PathBuf>) -> Self {
        ConversationTable {
            ctx,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, store_id: &str) -> PathBuf {
        resolve_path(&self.root, store_id)
    }

    /// Fold the four fields and append them as one record.
    ///
    /// All inputs are validated and the store header is checked before any
    /// symbol is registered; the four fields register as one batch.
    pub fn insert<'a>(
        &self,
        store_id: &str,
        timestamp: impl Into<Input<'a>>,
        attachment: impl Into<Input<'a>>,
        purpose: impl Into<Input<'a>>,
        sentence: impl Into<Input<'a>>,
    ) -> Result<()> {
        validate_id(store_id)?;
        let fields = [
            timestamp.into().bytes()?,
            attachment.into().bytes()?,
            purpose.into().bytes()?,
            sentence.into().bytes()?,
        ];

        let path = self.path(store_id);
        let _lock = FileLock::exclusive(&path)?;

        let existing = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if existing > 0 {
            // never append behind a header we cannot read
            let mut header = Vec::with_capacity(STORE_HEADER_SIZE);
            File::open(&path)?
                .take(STORE_HEADER_SIZE as u64)
                .read_to_end(&mut header)?;
            split_header(&header, StoreKind::Conversation, self.ctx.descriptor(), &path)?;
        }

        let folded = self.ctx.create_fields(fields)?;
        let mut bytes = Vec::new();
        if existing == 0 {
            bytes.extend_from_slice(&header_bytes(StoreKind::Conversation, self.ctx.descriptor()));
        }
        bytes.extend(encode_record(&folded)?);

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Err(e) = append_or_rollback(&mut file, existing, &bytes) {
            if existing == 0 {
                drop(file);
                let _ = fs::remove_file(&path);
            }
            return Err(e);
        }
        if existing == 0 {
            info!(store = store_id, "created conversation store");
        }
        debug!(store = store_id, bytes = bytes.len(), "appended conversation row");
        Ok(())
    }

    /// [`insert`](Self::insert) stamped with the current UTC time.
    pub fn insert_now<'a>(
        &self,
        store_id: &str,
        attachment: impl Into<Input<'a>>,
        purpose: impl Into<Input<'a>>,
        sentence: impl Into<Input<'a>>,
    ) -> Result<()> {
        let (attachment, purpose, sentence) = (attachment.into(), purpose.into(), sentence.into());
        let timestamp = timestamp_now()?;
        self.insert(store_id, &timestamp, attachment, purpose, sentence)
    }

    /// Snapshot the store's current records.
    pub fn read(&self, store_id: &str) -> Result<ConversationLog> {
        validate_id(store_id)?;
        let path = self.path(store_id);
        let bytes = read_locked(&path, || format!("conversation store '{store_id}'"))?;
        split_header(&bytes, StoreKind::Conversation, self.ctx.descriptor(), &path)?;
        Ok(ConversationLog {
            ctx: self.ctx.clone(),
            path,
            bytes: Arc::from(bytes),
        })
    }

    /// Number of rows in the store.
    pub fn len(&self, store_id: &str) -> Result<usize> {
        self.read(store_id)?.iter().try_fold(0, |n, row| row.map(|_| n + 1))
    }
}

/// Append target that can be cut back after a failed write.
trait AppendTarget: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Write `bytes` after the first `start` bytes of `target`. On failure the
/// target is cut back to `start`, so a torn record never stays behind.
fn append_or_rollback<T: AppendTarget>(target: &mut T, start: u64, bytes: &[u8]) -> Result<()> {
    let written = target
        .write_all(bytes)
        .and_then(|()| target.flush())
        .and_then(|()| target.sync());
    if let Err(err) = written {
        if let Err(undo) = target.truncate_to(start) {
            warn!(error = %undo, "could not roll back partial append");
        }
        return Err(err.into());
    }
    Ok(())
}

/// Records of one conversation store as of the moment it was read.
///
/// [`iter`](Self::iter) may be called any number of times; each call starts
/// again from the first row.
#[derive(Clone, Debug)]
pub struct ConversationLog {
    ctx: XContext,
    path: PathBuf,
    bytes: Arc<[u8]>,
}

impl ConversationLog {
    pub fn iter(&self) -> ConversationRows<'_> {
        ConversationRows {
            log: self,
            offset: 0,
            done: false,
        }
    }

    /// Collect every row, failing on the first corrupt record.
    pub fn rows(&self) -> Result<Vec<ConversationRow>> {
        self.iter().collect()
    }

    fn records(&self) -> &[u8] {
        &self.bytes[STORE_HEADER_SIZE..]
    }
}

impl<'a> IntoIterator for &'a ConversationLog {
    type Item = Result<ConversationRow>;
    type IntoIter = ConversationRows<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy row iterator; stops after yielding the first error.
pub struct ConversationRows<'a> {
    log: &'a ConversationLog,
    offset: usize,
    done: bool,
}

impl ConversationRows<'_> {
    fn decode(&mut self) -> Result<Option<ConversationRow>> {
        let log = self.log;
        let Some(fields) = next_record(log.records(), &mut self.offset, &log.path)? else {
            return Ok(None);
        };
        let [timestamp, attachment, purpose, sentence] = fields[..] else {
            return Err(XError::corrupt(
                &log.path,
                format!("conversation record has {} fields, expected {FIELD_COUNT}", fields.len()),
            ));
        };
        Ok(Some(ConversationRow {
            timestamp: log.ctx.light_output(timestamp)?,
            attachment: log.ctx.light_output(attachment)?,
            purpose: log.ctx.light_output(purpose)?,
            sentence: log.ctx.light_output(sentence)?,
        }))
    }
}

impl Iterator for ConversationRows<'_> {
    type Item = Result<ConversationRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.decode() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::field::FieldDescriptor;

    fn table() -> (tempfile::TempDir, ConversationTable) {
        let dir = tempfile::tempdir().unwrap();
        let table = ConversationTable::new(XContext::default(), dir.path());
        (dir, table)
    }

    #[test]
    fn rows_come_back_in_insertion_order() {
        let (_dir, table) = table();
        table.insert("chat", b"t1", b"", b"greet", b"hello").unwrap();
        let first = table.read("chat").unwrap().rows().unwrap();
        table.insert("chat", b"t2", b"file", b"ask", b"how are you").unwrap();

        let rows = table.read("chat").unwrap().rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], first[0]);
        let ctx = &table.ctx;
        assert_eq!(rows[1].sentence, ctx.output(&ctx.create(b"how are you").unwrap()).unwrap());
    }

    #[test]
    fn iteration_restarts_from_the_top() {
        let (_dir, table) = table();
        for i in 0..3u8 {
            table.insert("chat", &[i], b"a", b"p", b"s").unwrap();
        }
        let log = table.read("chat").unwrap();
        assert_eq!(log.iter().count(), 3);
        assert_eq!(log.iter().count(), 3);
        assert_eq!(table.len("chat").unwrap(), 3);
    }

    #[test]
    fn missing_store_is_not_found() {
        let (_dir, table) = table();
        assert_eq!(table.read("nobody").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn bad_input_registers_nothing() {
        let (_dir, table) = table();
        let err = table.insert("chat", b"t", b"a", "purpose as text", b"s").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(table.ctx.symbol_count(), 0);
        assert!(!table.path("chat").exists());
    }

    #[test]
    fn capacity_failure_registers_nothing_and_appends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = XContext::new(FieldDescriptor::default(), 4);
        let table = ConversationTable::new(ctx.clone(), dir.path());
        table.insert("chat", b"a", b"a", b"a", b"a").unwrap();
        let len = fs::metadata(table.path("chat")).unwrap().len();
        assert_eq!(ctx.symbol_count(), 2);

        // b and c would fit, d is one symbol too many
        let err = table.insert("chat", b"a", b"b", b"c", b"d").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert_eq!(ctx.symbol_count(), 2);
        assert_eq!(fs::metadata(table.path("chat")).unwrap().len(), len);
        assert_eq!(table.len("chat").unwrap(), 1);
    }

    #[test]
    fn unreadable_header_is_reported_before_registration() {
        let (_dir, table) = table();
        fs::write(table.path("chat"), b"not a store at all, just text").unwrap();
        let err = table.insert("chat", b"t", b"a", b"p", b"s").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(table.ctx.symbol_count(), 0);
    }

    #[test]
    fn session_id_is_not_a_store() {
        let (_dir, table) = table();
        let err = table.insert("session", b"t", b"a", b"p", b"s").unwrap_err();
        assert!(matches!(err, XError::InvalidStoreId { .. }));
        assert_eq!(table.ctx.symbol_count(), 0);
    }

    #[test]
    fn reading_a_missing_store_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("stores");
        let table = ConversationTable::new(XContext::default(), &root);
        assert_eq!(table.read("chat").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!root.exists());
    }

    /// In-memory target that accepts at most `room` bytes in total.
    struct ShortDisk {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for ShortDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let free = self.room.saturating_sub(self.data.len());
            if free == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = buf.len().min(free);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AppendTarget for ShortDisk {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_append_is_cut_back() {
        let mut disk = ShortDisk {
            data: b"header+row".to_vec(),
            room: 16,
        };
        let err = append_or_rollback(&mut disk, 10, &[7; 20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(disk.data, b"header+row");

        disk.room = 64;
        append_or_rollback(&mut disk, 10, &[7; 20]).unwrap();
        assert_eq!(disk.data.len(), 30);
    }

    #[test]
    fn timestamp_has_utc_shape() {
        let ts = timestamp_now().unwrap();
        assert_eq!(ts.len(), 20);
        assert_eq!(ts[4], b'-');
        assert_eq!(ts[10], b'T');
        assert_eq!(ts[19], b'Z');
    }
}
