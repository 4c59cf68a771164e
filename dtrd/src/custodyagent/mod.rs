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

//! Custody Manager (component 5): accepts custody, accumulates and flushes
//! Aggregate Custody Signals, discharges on signal/expiry/local delivery,
//! and retries un-acknowledged custody transfers with backoff.

pub mod agent;
pub mod messages;
pub mod store;

use bp7::administrative_record::custody_signal::CustodySignalReason;
use bp7::endpoint::Endpoint;

/// One bundle this node currently holds custody of.
#[derive(Debug, Clone)]
pub struct CustodyEntry {
    pub local_custody_id: u64,
    pub bundle_id: u64,
    pub previous_custodian: Endpoint,
    pub bundle_source: Endpoint,
    pub bundle_creation_time: u64,
    pub bundle_creation_sequence: u64,
    pub fragment_offset: Option<u64>,
    pub fragment_length: Option<u64>,
    pub expires_at_dtntime: u64,
    /// Milliseconds, doubled (capped at the configured max) each time a
    /// retry timer fires without a matching discharge.
    pub retry_backoff_ms: u64,
}

/// One (previous-custodian, reason) bucket accumulating custody-ids before
/// being flushed as a single Aggregate Custody Signal.
#[derive(Debug, Clone)]
pub struct PendingAcs {
    pub previous_custodian: Endpoint,
    pub reason: CustodySignalReason,
    pub succeeded: bool,
    pub custody_ids: Vec<u64>,
    pub opened_at_ms: u64,
}

impl PendingAcs {
    pub fn new(previous_custodian: Endpoint, reason: CustodySignalReason, succeeded: bool, opened_at_ms: u64) -> Self {
        Self {
            previous_custodian,
            reason,
            succeeded,
            custody_ids: Vec::new(),
            opened_at_ms,
        }
    }
}
