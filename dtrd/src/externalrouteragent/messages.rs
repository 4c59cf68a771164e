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

use std::net::SocketAddr;

use actix::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

/// One bundle row of a full state snapshot (§4.7a).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSnapshot {
    pub bundle_id: u64,
    pub source: String,
    pub destination: String,
    pub size: u64,
}

/// One link row of a full state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub url: String,
    pub connection_status: String,
    pub remote_endpoint: Option<String>,
}

/// One contact (routing table entry) row of a full state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub target: String,
    pub next_hop: String,
    pub available: bool,
    pub max_bundle_size: Option<u64>,
}

/// Incremental events pushed to the external router as they happen (§4.7b).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    BundleAdmitted(BundleSnapshot),
    BundleFreed { bundle_id: u64 },
    BundleTransmitted { bundle_id: u64, link: String },
    LinkUp(LinkSnapshot),
    LinkDown { url: String },
    ContactChanged(ContactSnapshot),
    AcsObserved { previous_custodian: String, count: u64 },
}

/// Commands the external router may issue (§4.7c). None of these touch the
/// Bundle Store directly; link-control commands adjust admission only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    AddRoute {
        target: String,
        next_hop: String,
        max_bundle_size: Option<u64>,
    },
    DeleteRoute {
        target: String,
        next_hop: String,
    },
    SetLinkEnabled {
        url: String,
        enabled: bool,
    },
    Aos {
        url: String,
    },
    Los {
        url: String,
    },
    SetThrottle {
        url: String,
        bits_per_second: Option<u64>,
    },
    ForceTransmit {
        bundle_id: u64,
    },
    CancelBundle {
        bundle_id: u64,
    },
    DeleteBundleBySourceDestination {
        source: String,
        destination: String,
    },
}

/// Operational queries (§4.7d).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Query {
    BundleStats { source: String, destination: String },
    LinkStats { url: String },
    QuotaStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub received: u64,
    pub transmitted: u64,
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueryResult {
    BundleStats {
        cumulative: TrafficCounters,
        interval: TrafficCounters,
    },
    LinkStats {
        cumulative: TrafficCounters,
        interval: TrafficCounters,
    },
    QuotaStats {
        used_bytes: u64,
        capacity_bytes: Option<u64>,
    },
}

/// One frame of the external-router wire protocol, after CBOR decoding.
/// A resync report is `ReconcileStart`, zero or more snapshot records, then
/// `ReconcileEnd`; any bundle/link/contact not re-announced before
/// `ReconcileEnd` is understood by the router to no longer exist (§4.7
/// "Resync discipline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    ReconcileStart,
    Bundle(BundleSnapshot),
    Link(LinkSnapshot),
    Contact(ContactSnapshot),
    ReconcileEnd,
    Event(Event),
    Command(Command),
    Query(Query),
    QueryResult(QueryResult),
    CommandNack { reason: String },
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct NewExternalRouterConnection {
    pub stream: TcpStream,
    pub address: SocketAddr,
}

/// Published by any other agent whose state change is externally visible.
/// Dropped silently if no router is currently connected; the cumulative and
/// interval counters it feeds are kept regardless, so a query still answers
/// correctly if no router was attached while the traffic happened.
#[derive(Message)]
#[rtype(result = "()")]
pub struct PublishEvent {
    pub event: Event,
}

#[derive(Message)]
#[rtype(result = "()")]
pub(crate) struct SessionClosed {
    pub address: SocketAddr,
}

/// Returns (cumulative, interval) for a source-destination pair and resets
/// the interval counter to zero.
#[derive(Message)]
#[rtype(result = "(TrafficCounters, TrafficCounters)")]
pub(crate) struct GetBundleStats {
    pub source: String,
    pub destination: String,
}

/// Returns (cumulative, interval) for a link and resets the interval
/// counter to zero.
#[derive(Message)]
#[rtype(result = "(TrafficCounters, TrafficCounters)")]
pub(crate) struct GetLinkStats {
    pub url: String,
}

/// Total size of bundles currently admitted and not yet freed, as tracked
/// from `Event::BundleAdmitted`/`Event::BundleFreed`.
#[derive(Message)]
#[rtype(result = "u64")]
pub(crate) struct GetUsedBytes {}
