//! Settings Table - one row per key, updated in place
//!
//! An update rewrites the whole store: the new contents go to a temp file in
//! the same directory which is fsynced and renamed over the original, so a
//! crash mid-update leaves either the old or the new store.

use super::{encode_record, header_bytes, next_record, split_header, StoreKind};
use crate::disk::{read_existing, read_locked, resolve_path, validate_id, write_atomic, FileLock};
use crate::error::{Result, XError};
use crate::pipeline::{Input, XContext};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// One settings row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingRow {
    pub key: Vec<u8>,
    pub values: Vec<Vec<u8>>,
}

/// Key-upsert settings stores under one root directory.
///
/// # Examples
///
/// ```
/// use xformat::{SettingsTable, XContext};
///
/// let dir = tempfile::tempdir().unwrap();
/// let ctx = XContext::default();
/// let settings = SettingsTable::new(ctx.clone(), dir.path());
/// settings.update("creator", b"theme", [b"dark"]).unwrap();
/// settings.update("creator", b"theme", [b"lite"]).unwrap();
///
/// let rows = settings.read("creator").unwrap();
/// assert_eq!(rows.len(), 1);
/// let expected = ctx.output(&ctx.create(b"lite").unwrap()).unwrap();
/// assert_eq!(rows[0].values, vec![expected]);
/// ```
#[derive(Clone, Debug)]
pub struct SettingsTable {
    ctx: XContext,
    root: PathBuf,
}

impl SettingsTable {
    pub fn new(ctx: XContext, root: impl Into<PathBuf>) -> Self {
        SettingsTable {
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

    /// Replace the value stored under `key`, or append a new row.
    ///
    /// Creates the store when it does not exist yet. The key is kept as its
    /// padded bytes so distinct keys never share a row; the values are
    /// folded. Nothing is registered when the existing store is unreadable.
    pub fn update<'a, I>(&self, store_id: &str, key: impl Into<Input<'a>>, values: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Input<'a>>,
    {
        validate_id(store_id)?;
        let key = key.into().bytes()?;
        let values = values
            .into_iter()
            .map(|value| value.into().bytes())
            .collect::<Result<Vec<_>>>()?;
        let padded_key = self.ctx.descriptor().pad(key);

        let path = self.path(store_id);
        let _lock = FileLock::exclusive(&path)?;

        let existing = match read_existing(&path, String::new) {
            Ok(bytes) => Some(bytes),
            Err(XError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let rows = match &existing {
            Some(bytes) => self.decode_rows(bytes, &path)?,
            None => Vec::new(),
        };

        // the key registers with the values so `read` can map it
        let mut fields = self.ctx.create_fields(std::iter::once(key).chain(values))?;
        fields[0] = padded_key;
        let new_record = encode_record(&fields)?;

        let mut out = header_bytes(StoreKind::Settings, self.ctx.descriptor()).to_vec();
        let mut replaced = false;
        for row in &rows {
            if row.key == fields[0] {
                out.extend_from_slice(&new_record);
                replaced = true;
            } else {
                let mut kept: Vec<&[u8]> = vec![row.key.as_slice()];
                kept.extend(row.values.iter().map(Vec::as_slice));
                out.extend(encode_record(&kept)?);
            }
        }
        if !replaced {
            out.extend_from_slice(&new_record);
        }

        write_atomic(&path, &out)?;
        if existing.is_none() {
            info!(store = store_id, "created settings store");
        } else {
            info!(store = store_id, replaced, bytes = out.len(), "rewrote settings store");
        }
        Ok(())
    }

    /// Every row in store order, with `light_output` applied.
    pub fn read(&self, store_id: &str) -> Result<Vec<SettingRow>> {
        self.load(store_id)?
            .into_iter()
            .map(|row| self.light(row))
            .collect()
    }

    /// Value stored under `key`, with `light_output` applied.
    pub fn get<'a>(&self, store_id: &str, key: impl Into<Input<'a>>) -> Result<Vec<Vec<u8>>> {
        let key = self.ctx.descriptor().pad(key.into().bytes()?);
        let row = self
            .load(store_id)?
            .into_iter()
            .find(|row| row.key == key)
            .ok_or_else(|| key_not_found(store_id))?;
        Ok(self.light(row)?.values)
    }

    /// Rows whose key starts with `prefix`, with `light_output` applied.
    pub fn find_prefix<'a>(&self, store_id: &str, prefix: impl Into<Input<'a>>) -> Result<Vec<SettingRow>> {
        let prefix = prefix.into().bytes()?;
        self.load(store_id)?
            .into_iter()
            .filter(|row| row.key.starts_with(prefix))
            .map(|row| self.light(row))
            .collect()
    }

    /// Rows as stored: padded keys, folded values.
    fn load(&self, store_id: &str) -> Result<Vec<SettingRow>> {
        validate_id(store_id)?;
        let path = self.path(store_id);
        let bytes = read_locked(&path, || format!("settings store '{store_id}'"))?;
        self.decode_rows(&bytes, &path)
    }

    fn decode_rows(&self, bytes: &[u8], path: &Path) -> Result<Vec<SettingRow>> {
        let records = split_header(bytes, StoreKind::Settings, self.ctx.descriptor(), path)?;
        let mut rows = Vec::new();
        let mut keys = HashSet::new();
        let mut offset = 0;
        while let Some(fields) = next_record(records, &mut offset, path)? {
            let Some((key, values)) = fields.split_first() else {
                return Err(XError::corrupt(path, "settings record without a key"));
            };
            if !keys.insert(*key) {
                return Err(XError::corrupt(path, "duplicate settings key"));
            }
            rows.push(SettingRow {
                key: key.to_vec(),
                values: values.iter().map(|v| v.to_vec()).collect(),
            });
        }
        Ok(rows)
    }

    fn light(&self, row: SettingRow) -> Result<SettingRow> {
        Ok(SettingRow {
            key: self.ctx.light_output(&row.key)?,
            values: row
                .values
                .iter()
                .map(|value| self.ctx.light_output(value))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

fn key_not_found(store_id: &str) -> XError {
    XError::not_found(format!("key in settings store '{store_id}'"))
}
