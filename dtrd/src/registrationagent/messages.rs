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
use tokio::sync::mpsc;

use crate::bundlestorageagent::StoredBundleRef;
use crate::common::error::AgentError;

use super::{DeliveryPolicy, EndpointPattern, ReplayPolicy};

/// Creates a new registration. Returns its assigned, persistent id.
#[derive(Message, Debug)]
#[rtype(result = "Result<u64, AgentError>")]
pub struct RegisterEndpoint {
    pub pattern: EndpointPattern,
    pub delivery_policy: DeliveryPolicy,
    pub replay_policy: ReplayPolicy,
    pub bundle_ack_required: bool,
    pub expiration: Option<u64>,
    pub reg_token: Option<u64>,
}

#[derive(Message)]
#[rtype(result = "Result<(), AgentError>")]
pub struct UnregisterEndpoint {
    pub registration_id: u64,
}

/// `find-registration(eid [, token])`: first registration whose pattern
/// matches `destination`, optionally disambiguated by `reg_token`.
#[derive(Message)]
#[rtype(result = "Result<Option<u64>, AgentError>")]
pub struct FindRegistration {
    pub destination: Endpoint,
    pub reg_token: Option<u64>,
}

/// Activates a registration on an IPC session: from here on the
/// registration is "active" and delivers into `sender`.
#[derive(Message)]
#[rtype(result = "Result<(), AgentError>")]
pub struct BindRegistration {
    pub registration_id: u64,
    pub sender: mpsc::Sender<DeliverBundle>,
}

/// Returns a registration to "passive": its queue keeps draining per
/// `DeliveryPolicy`, but nothing is pushed over an IPC channel any more.
#[derive(Message)]
#[rtype(result = "Result<(), AgentError>")]
pub struct UnbindRegistration {
    pub registration_id: u64,
}

/// Acknowledges local delivery of `bundle_id` on `registration_id`: only
/// meaningful when the registration requires `bundle_ack`, at which point
/// this is what finally discharges the bundle's `registration_pending`
/// reservation.
#[derive(Message)]
#[rtype(result = "Result<(), AgentError>")]
pub struct AckBundle {
    pub registration_id: u64,
    pub bundle_id: u64,
}

/// One bundle handed to an IPC session's recv/peek loop.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct DeliverBundle {
    pub registration_id: u64,
    pub bundle: StoredBundleRef,
}

/// From the Event Dispatcher: a newly admitted or updated bundle that
/// should be matched against every active registration's pattern.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver {
    pub bundle: StoredBundleRef,
}

/// To the Event Dispatcher: local delivery completed (no ack required, or
/// the bound application just acked).
#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleDelivered {
    pub endpoint: Endpoint,
    pub bundle: StoredBundleRef,
}

/// To the Event Dispatcher: the IPC channel a registration was bound to
/// went away before the bundle could be handed off.
#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleDeliveryFailed {
    pub endpoint: Endpoint,
    pub bundle: StoredBundleRef,
}
