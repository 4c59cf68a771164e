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

use actix::prelude::*;
use bp7::administrative_record::aggregate_custody_signal::AggregateCustodySignal;
use bp7::administrative_record::custody_signal::CustodySignal;

use crate::bundlestorageagent::StoredBundleRef;
use crate::common::error::AgentError;

/// From the Event Dispatcher: a newly-valid bundle requests custody
/// transfer. The Custody Manager decides accept/refuse and, either way,
/// arranges for a signal to go back to `previous_custodian`. Returns the
/// `local_custody_id` this node now holds the bundle's obligation under
/// (`None` if custody transfer was not requested), so the caller can stamp
/// it onto the bundle before forwarding it onward.
#[derive(Message)]
#[rtype(result = "Option<u64>")]
pub struct AcceptCustodyIfRequested {
    pub bundle: StoredBundleRef,
}

/// An administrative-record bundle addressed to us decoded to a single
/// `CustodySignal`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CustodySignalReceived {
    pub signal: CustodySignal,
}

/// An administrative-record bundle addressed to us decoded to an
/// `AggregateCustodySignal`.
#[derive(Message)]
#[rtype(result = "()")]
pub struct AggregateCustodySignalReceived {
    pub signal: AggregateCustodySignal,
}

/// Why a custody entry was discharged without a signal from the next
/// custodian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DischargeReason {
    Delivered,
    LifetimeExpired,
}

/// The bundle this custody entry covers was delivered locally or expired
/// before any ACS arrived for it: discharge our own obligation without
/// forwarding one upstream.
#[derive(Message)]
#[rtype(result = "()")]
pub struct DischargeLocal {
    pub bundle_id: u64,
    pub reason: DischargeReason,
}

/// Internal: retransmission timer for one custody entry fired.
#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct RetryTimeout {
    pub local_custody_id: u64,
}

/// Internal: the accumulation window for one Pending ACS elapsed.
#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct FlushAcsTimeout {
    pub bucket_key: (String, u8),
}

#[derive(Message)]
#[rtype(result = "Result<(), AgentError>")]
pub struct ForceFlushAll {}
