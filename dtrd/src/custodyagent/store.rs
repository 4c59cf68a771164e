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

//! Durable half of the Custody Manager: one row per outstanding custody
//! entry plus the monotonic local-custody-id counter, the same
//! row-plus-counter shape as `registrationagent::store`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::error::AgentError;
use crate::common::settings::Settings;

use super::CustodyEntry;

const COUNTER_KEY: &[u8] = b"__next_custody_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCustodyEntry {
    pub local_custody_id: u64,
    pub bundle_id: u64,
    pub previous_custodian: bp7::endpoint::Endpoint,
    pub bundle_source: bp7::endpoint::Endpoint,
    pub bundle_creation_time: u64,
    pub bundle_creation_sequence: u64,
    pub fragment_offset: Option<u64>,
    pub fragment_length: Option<u64>,
    pub expires_at_dtntime: u64,
    pub retry_backoff_ms: u64,
}

impl From<&CustodyEntry> for PersistedCustodyEntry {
    fn from(e: &CustodyEntry) -> Self {
        Self {
            local_custody_id: e.local_custody_id,
            bundle_id: e.bundle_id,
            previous_custodian: e.previous_custodian.clone(),
            bundle_source: e.bundle_source.clone(),
            bundle_creation_time: e.bundle_creation_time,
            bundle_creation_sequence: e.bundle_creation_sequence,
            fragment_offset: e.fragment_offset,
            fragment_length: e.fragment_length,
            expires_at_dtntime: e.expires_at_dtntime,
            retry_backoff_ms: e.retry_backoff_ms,
        }
    }
}

impl From<PersistedCustodyEntry> for CustodyEntry {
    fn from(p: PersistedCustodyEntry) -> Self {
        Self {
            local_custody_id: p.local_custody_id,
            bundle_id: p.bundle_id,
            previous_custodian: p.previous_custodian,
            bundle_source: p.bundle_source,
            bundle_creation_time: p.bundle_creation_time,
            bundle_creation_sequence: p.bundle_creation_sequence,
            fragment_offset: p.fragment_offset,
            fragment_length: p.fragment_length,
            expires_at_dtntime: p.expires_at_dtntime,
            retry_backoff_ms: p.retry_backoff_ms,
        }
    }
}

pub struct Store {
    db: rocksdb::DB,
}

impl Store {
    pub fn open(settings: &Settings) -> Result<Self, AgentError> {
        let path = Path::new(&settings.storage_path).join("custody.rocksdb");
        Ok(Self {
            db: rocksdb::DB::open_default(path)?,
        })
    }

    fn key(id: u64) -> [u8; 8] {
        id.to_be_bytes()
    }

    pub fn next_id(&self) -> Result<u64, AgentError> {
        let next = match self.db.get(COUNTER_KEY)? {
            Some(bytes) => u64::from_be_bytes(bytes.as_slice().try_into().unwrap_or([0; 8])) + 1,
            None => 1,
        };
        self.db.put(COUNTER_KEY, next.to_be_bytes())?;
        Ok(next)
    }

    pub fn put(&self, entry: &CustodyEntry) -> Result<(), AgentError> {
        let value = serde_cbor::to_vec(&PersistedCustodyEntry::from(entry))
            .map_err(|e| AgentError::Codec(e.to_string()))?;
        self.db.put(Self::key(entry.local_custody_id), value)?;
        Ok(())
    }

    pub fn delete(&self, local_custody_id: u64) -> Result<(), AgentError> {
        self.db.delete(Self::key(local_custody_id))?;
        Ok(())
    }

    /// Every outstanding custody entry, for the startup reload pass.
    pub fn scan_all(&self) -> Result<Vec<CustodyEntry>, AgentError> {
        let mut out = Vec::new();
        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            if key.as_ref() == COUNTER_KEY {
                continue;
            }
            let persisted: PersistedCustodyEntry =
                serde_cbor::from_slice(&value).map_err(|e| AgentError::Codec(e.to_string()))?;
            out.push(persisted.into());
        }
        Ok(out)
    }
}
