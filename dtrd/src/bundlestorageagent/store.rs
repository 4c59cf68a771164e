// Copyright (C) 2023 Felix Huettner
//
// This file is part of DTRD.
//
// DTRD is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// DTRD is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Durable half of the Bundle Store.
//!
//! A rocksdb database holds one row per admitted bundle (`bundle_id` as an
//! 8-byte big-endian key) plus a monotonic id counter row. A bundle's row
//! either carries its encoded bytes inline, or - once the bundle is at or
//! above `payload_spill_threshold_bytes` - a pointer to a file in a
//! content-addressed directory, named after the sha256 of the encoded
//! bundle. Writing a spilled bundle always creates the content file before
//! touching the metadata row, so a crash between the two leaves an orphan
//! file (cleaned up by `collect_orphans` at startup) rather than a
//! metadata row pointing at nothing.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::common::error::AgentError;
use crate::common::settings::Settings;

const COUNTER_KEY: &[u8] = b"__next_bundle_id";
const TAG_INLINE: u8 = 0;
const TAG_FILE: u8 = 1;

pub struct Store {
    db: rocksdb::DB,
    content_dir: PathBuf,
    spill_threshold: u64,
}

impl Store {
    pub fn open(settings: &Settings) -> Result<Self, AgentError> {
        let base = Path::new(&settings.storage_path);
        let content_dir = base.join("content");
        fs::create_dir_all(&content_dir)?;
        let db = rocksdb::DB::open_default(base.join("meta.rocksdb"))?;
        let store = Self {
            db,
            content_dir,
            spill_threshold: settings.payload_spill_threshold_bytes,
        };
        store.collect_orphans()?;
        Ok(store)
    }

    fn bundle_key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    /// Allocates and persists the next bundle id. Safe to call concurrently
    /// with nothing else touching this store, which holds here because the
    /// Bundle Store actor is the only writer.
    pub fn next_bundle_id(&self) -> Result<u64, AgentError> {
        let next = match self.db.get(COUNTER_KEY)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8])) + 1,
            None => 1,
        };
        self.db.put(COUNTER_KEY, next.to_be_bytes())?;
        Ok(next)
    }

    /// Persists the full encoded bundle for `id`, spilling to a
    /// content-addressed file when it is at or above the configured
    /// threshold.
    pub fn put(&self, id: u64, data: &[u8]) -> Result<(), AgentError> {
        let mut value = Vec::with_capacity(1 + data.len().min(33));
        if (data.len() as u64) < self.spill_threshold {
            value.push(TAG_INLINE);
            value.extend_from_slice(data);
        } else {
            let hash = Self::content_hash(data);
            let path = self.content_dir.join(hex_encode(&hash));
            if !path.exists() {
                let tmp = self.content_dir.join(format!(".{}.tmp", hex_encode(&hash)));
                fs::write(&tmp, data)?;
                fs::rename(&tmp, &path)?;
            }
            value.push(TAG_FILE);
            value.extend_from_slice(&hash);
        }
        self.db.put(Self::bundle_key(id), value)?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Option<Vec<u8>>, AgentError> {
        let Some(value) = self.db.get(Self::bundle_key(id))? else {
            return Ok(None);
        };
        self.resolve(&value).map(Some)
    }

    pub fn delete(&self, id: u64) -> Result<(), AgentError> {
        self.db.delete(Self::bundle_key(id))?;
        Ok(())
    }

    /// All bundle ids currently persisted, for the startup reload pass.
    pub fn scan_ids(&self) -> Result<Vec<(u64, Vec<u8>)>, AgentError> {
        let mut out = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() == COUNTER_KEY {
                continue;
            }
            if key.len() != 8 {
                continue;
            }
            let id = u64::from_be_bytes(key.as_ref().try_into().unwrap());
            let data = self.resolve(&value)?;
            out.push((id, data));
        }
        Ok(out)
    }

    fn resolve(&self, value: &[u8]) -> Result<Vec<u8>, AgentError> {
        match value.first() {
            Some(&TAG_INLINE) => Ok(value[1..].to_vec()),
            Some(&TAG_FILE) => {
                let hash = &value[1..];
                let path = self.content_dir.join(hex_encode(hash));
                fs::read(&path).map_err(|e| {
                    AgentError::DataLoss(format!(
                        "payload file {} missing for stored bundle: {e}",
                        path.display()
                    ))
                })
            }
            _ => Err(AgentError::Consistency("corrupt bundle store row".into())),
        }
    }

    fn content_hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    /// Deletes content files with no referencing metadata row. Run once at
    /// startup: a crash between writing a content file and its metadata row
    /// leaves exactly this kind of orphan.
    fn collect_orphans(&self) -> Result<(), AgentError> {
        let mut referenced = std::collections::HashSet::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::Start);
        for item in iter {
            let (key, value) = item?;
            if key.as_ref() == COUNTER_KEY {
                continue;
            }
            if value.first() == Some(&TAG_FILE) {
                referenced.insert(hex_encode(&value[1..]));
            }
        }
        for entry in fs::read_dir(&self.content_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') {
                let _ = fs::remove_file(entry.path());
                continue;
            }
            if !referenced.contains(name.as_ref()) {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
