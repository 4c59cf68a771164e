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

use std::sync::Arc;

use bp7::{bundle::Bundle, primaryblock::PrimaryBlock};

use crate::common::error::AgentError;

pub mod agent;
pub mod messages;
pub mod store;

/// Lifecycle state of an admitted bundle, advanced exclusively by the
/// Bundle Protocol Agent through `UpdateBundle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Received,
    Valid,
    DeliveryQueued,
    ForwardingQueued,
    Delivered,
    Forwarded,
    Invalid,
    /// Wall-clock passed the bundle's creation-time plus lifetime before any
    /// other terminal state was reached.
    Expired,
}

#[derive(Debug)]
struct StoredBundleInner {
    id: u64,
    primary_block: PrimaryBlock,
    size: u64,
    min_size: Option<u64>,
    state: State,
    data: Option<Vec<u8>>,
}

/// A cheap-to-clone, immutable snapshot of one admitted bundle as it stood
/// at the moment the Bundle Store handed it out. Agents that need a fresher
/// view (e.g. after an `UpdateBundle`) receive a new `StoredBundleRef` in
/// the event announcing the change rather than observing a mutation on an
/// existing one, so a `StoredBundleRef` can be pushed onto a `VecDeque` and
/// read back later without ever going stale from the reader's perspective.
#[derive(Debug, Clone)]
pub struct StoredBundleRef(Arc<StoredBundleInner>);

impl StoredBundleRef {
    fn new(
        id: u64,
        primary_block: PrimaryBlock,
        size: u64,
        min_size: Option<u64>,
        state: State,
        data: Option<Vec<u8>>,
    ) -> Self {
        Self(Arc::new(StoredBundleInner {
            id,
            primary_block,
            size,
            min_size,
            state,
            data,
        }))
    }

    pub fn bundle_id(&self) -> u64 {
        self.0.id
    }

    /// String form of the bundle id, for callers keying a set/map on it
    /// (e.g. the per-link visited-set while forwarding).
    pub fn get_id(&self) -> String {
        self.0.id.to_string()
    }

    pub fn get_primary_block(&self) -> &PrimaryBlock {
        &self.0.primary_block
    }

    pub fn get_state(&self) -> State {
        self.0.state
    }

    pub fn get_bundle_size(&self) -> u64 {
        self.0.size
    }

    pub fn get_bundle_min_size(&self) -> Option<u64> {
        self.0.min_size
    }

    /// The full encoded bundle, if this handle was loaded with its data. A
    /// handle produced purely from a metadata scan may return `None`.
    pub fn get_bundle_data(&self) -> Option<&Vec<u8>> {
        self.0.data.as_ref()
    }

    /// Decodes the full `Bundle` borrowing from this handle's encoded data.
    /// `bp7::bundle::Bundle` borrows its payload zero-copy from the byte
    /// buffer it was decoded from, so this cannot hand back an owned value;
    /// callers that need the decoded view do so on demand instead of the
    /// handle carrying one permanently.
    pub fn decode_bundle(&self) -> Result<Bundle<'_>, AgentError> {
        let data = self
            .0
            .data
            .as_ref()
            .ok_or_else(|| AgentError::Consistency("bundle data not loaded for this handle".into()))?;
        data.as_slice()
            .try_into()
            .map_err(|e: bp7::SerializationError| AgentError::MalformedBundle(e.to_string()))
    }

    fn with_state(&self, state: State, data: Option<Vec<u8>>) -> Self {
        Self::new(
            self.0.id,
            self.0.primary_block.clone(),
            self.0.size,
            self.0.min_size,
            state,
            data.or_else(|| self.0.data.clone()),
        )
    }
}

impl PartialEq for StoredBundleRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl PartialEq<StoredBundleRef> for &StoredBundleRef {
    fn eq(&self, other: &StoredBundleRef) -> bool {
        self.0.id == other.0.id
    }
}
