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

//! Durable half of the Registration Table, following the same
//! rocksdb-row-plus-counter shape `bundlestorageagent::store` uses.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{DeliveryPolicy, EndpointPattern, ReplayPolicy};
use crate::common::error::AgentError;
use crate::common::settings::Settings;

const COUNTER_KEY: &[u8] = b"__next_registration_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRegistration {
    pub id: u64,
    pub pattern: EndpointPattern,
    pub delivery_policy: DeliveryPolicy,
    pub replay_policy: ReplayPolicy,
    pub bundle_ack_required: bool,
    pub expiration: Option<u64>,
    pub reg_token: Option<u64>,
}

pub struct Store {
    db: rocksdb::DB,
}

impl Store {
    pub fn open(settings: &Settings) -> Result<Self, AgentError> {
        let path = Path::new(&settings.storage_path).join("registrations.rocksdb");
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

    pub fn put(&self, reg: &PersistedRegistration) -> Result<(), AgentError> {
        let value = serde_cbor::to_vec(reg).map_err(|e| AgentError::Codec(e.to_string()))?;
        self.db.put(Self::key(reg.id), value)?;
        Ok(())
    }

    pub fn delete(&self, id: u64) -> Result<(), AgentError> {
        self.db.delete(Self::key(id))?;
        Ok(())
    }

    /// Every persisted registration, for the startup reload pass.
    pub fn scan_all(&self) -> Result<Vec<PersistedRegistration>, AgentError> {
        let mut out = Vec::new();
        for item in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            if key.as_ref() == COUNTER_KEY {
                continue;
            }
            let reg: PersistedRegistration =
                serde_cbor::from_slice(&value).map_err(|e| AgentError::Codec(e.to_string()))?;
            out.push(reg);
        }
        Ok(out)
    }
}
