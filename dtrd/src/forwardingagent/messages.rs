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
use bp7::endpoint::Endpoint;

use crate::bundlestorageagent::StoredBundleRef;
use crate::converganceagent::messages::AgentForwardBundle;

/// From the Event Dispatcher: a bundle was decided against our own node and
/// needs to go out over whatever link currently routes towards it.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForwardBundle {
    pub bundle: StoredBundleRef,
}

/// From the Custody Manager: a custody retry timer fired for this bundle;
/// fetch it back from the Bundle Store and re-enqueue it.
#[derive(Message)]
#[rtype(result = "()")]
pub struct RequestRetryForward {
    pub bundle_id: u64,
}

/// A link towards `next_hop` became usable for sending.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkAvailable {
    pub next_hop: Endpoint,
    pub sender: Recipient<AgentForwardBundle>,
    pub max_bundle_size: Option<u64>,
}

/// A link towards `next_hop` stopped being usable. Anything already queued
/// for it stays queued, waiting for the link (or a route change) to return.
#[derive(Message)]
#[rtype(result = "()")]
pub struct LinkUnavailable {
    pub next_hop: Endpoint,
}

/// To the Event Dispatcher: a bundle was handed off to its next hop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleForwarded {
    pub endpoint: Endpoint,
    pub bundle: StoredBundleRef,
}

/// To the Event Dispatcher: handoff to the next hop failed; the bundle has
/// already been requeued internally, this is purely informational.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleForwardingFailed {
    pub endpoint: Endpoint,
    pub bundle: StoredBundleRef,
}

/// External-router `SetThrottle` (§4.7c), forwarded here from `linkagent`
/// once it resolves the url to the next-hop endpoint it routes for.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ApplyLinkThrottle {
    pub next_hop: Endpoint,
    pub bits_per_second: Option<u64>,
}

/// External-router `ForceTransmit` (§4.7c): if the bundle is currently
/// queued for a link, boost it to the front of that link's priority queue
/// and attempt an immediate send. A bundle not currently queued (already in
/// flight, or still awaiting a route) has no well-defined "front" to jump
/// to and is left alone.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ForceTransmitBundle {
    pub bundle_id: u64,
}

/// External-router `CancelBundle`/`DeleteBundleBySourceDestination`
/// (§4.7c): remove the bundle from whichever link queue or awaiting-route
/// bucket currently holds it and release the link reservation it took at
/// `enqueue`. Returns whether anything was actually removed, so the caller
/// knows whether the reservation was released here or never existed.
#[derive(Message)]
#[rtype(result = "bool")]
pub struct CancelQueuedBundle {
    pub bundle_id: u64,
}
