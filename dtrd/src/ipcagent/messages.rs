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
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::registrationagent::{DeliveryPolicy, EndpointPattern, ReplayPolicy};

/// The `type:u8` leading a request frame (§6). Kept as its own enum (rather
/// than deriving it from `Request`'s discriminant at encode time only) so
/// the codec can validate the byte against the decoded payload and reject a
/// frame whose two halves disagree as a malformed-frame protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum RequestType {
    LocalEid = 1,
    Register = 2,
    Unregister = 3,
    FindRegistration = 4,
    Bind = 5,
    Unbind = 6,
    Send = 7,
    Recv = 8,
    Peek = 9,
    Ack = 10,
    Cancel = 11,
    BeginPoll = 12,
    CancelPoll = 13,
    SessionUpdate = 14,
}

/// Either an in-memory payload or a path to a file the daemon takes
/// ownership of / a temp file the client must read-then-unlink (§4.8
/// "Payload transport").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PayloadSpec {
    Inline(Vec<u8>),
    TempFile(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PatternKindWire {
    Exact,
    SchemeHostPrefix,
    WildcardTail,
}

impl PatternKindWire {
    pub fn into_pattern(self, pattern: String) -> EndpointPattern {
        match self {
            PatternKindWire::Exact => EndpointPattern::Exact(pattern),
            PatternKindWire::SchemeHostPrefix => EndpointPattern::SchemeHostPrefix(pattern),
            PatternKindWire::WildcardTail => EndpointPattern::WildcardTail(pattern),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DeliveryPolicyWire {
    Drop,
    Defer,
    ExecScript,
}

impl From<DeliveryPolicyWire> for DeliveryPolicy {
    fn from(value: DeliveryPolicyWire) -> Self {
        match value {
            DeliveryPolicyWire::Drop => DeliveryPolicy::Drop,
            DeliveryPolicyWire::Defer => DeliveryPolicy::Defer,
            DeliveryPolicyWire::ExecScript => DeliveryPolicy::ExecScript,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ReplayPolicyWire {
    NewOnly,
    None,
    AllQueued,
}

impl From<ReplayPolicyWire> for ReplayPolicy {
    fn from(value: ReplayPolicyWire) -> Self {
        match value {
            ReplayPolicyWire::NewOnly => ReplayPolicy::NewOnly,
            ReplayPolicyWire::None => ReplayPolicy::None,
            ReplayPolicyWire::AllQueued => ReplayPolicy::AllQueued,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    LocalEid,
    Register {
        pattern: String,
        pattern_kind: PatternKindWire,
        delivery_policy: DeliveryPolicyWire,
        replay_policy: ReplayPolicyWire,
        bundle_ack_required: bool,
        expiration: Option<u64>,
        reg_token: Option<u64>,
    },
    Unregister {
        registration_id: u64,
    },
    FindRegistration {
        destination: String,
        reg_token: Option<u64>,
    },
    Bind {
        registration_id: u64,
    },
    Unbind {
        registration_id: u64,
    },
    Send {
        registration_id: u64,
        destination: String,
        lifetime_ms: u64,
        custody_requested: bool,
        payload: PayloadSpec,
    },
    Recv {
        timeout_ms: u64,
    },
    Peek {
        timeout_ms: u64,
    },
    Ack {
        registration_id: u64,
        bundle_id: u64,
    },
    Cancel {
        bundle_id: u64,
    },
    BeginPoll {
        timeout_ms: u64,
    },
    CancelPoll,
    SessionUpdate,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::LocalEid => RequestType::LocalEid,
            Request::Register { .. } => RequestType::Register,
            Request::Unregister { .. } => RequestType::Unregister,
            Request::FindRegistration { .. } => RequestType::FindRegistration,
            Request::Bind { .. } => RequestType::Bind,
            Request::Unbind { .. } => RequestType::Unbind,
            Request::Send { .. } => RequestType::Send,
            Request::Recv { .. } => RequestType::Recv,
            Request::Peek { .. } => RequestType::Peek,
            Request::Ack { .. } => RequestType::Ack,
            Request::Cancel { .. } => RequestType::Cancel,
            Request::BeginPoll { .. } => RequestType::BeginPoll,
            Request::CancelPoll => RequestType::CancelPoll,
            Request::SessionUpdate => RequestType::SessionUpdate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    LocalEid {
        eid: String,
        service_tag: Option<String>,
    },
    Registered {
        registration_id: u64,
    },
    Unit,
    FoundRegistration {
        registration_id: Option<u64>,
    },
    BundleId {
        bundle_id: u64,
    },
    Delivery {
        source: String,
        destination: String,
        bundle_id: u64,
        payload: PayloadSpec,
    },
    PollReady,
    PollTimedOut,
    PollCancelled,
    SessionUpdate {
        pending_poll: bool,
        bound_registrations: Vec<u64>,
    },
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct NewIpcConnection {
    pub stream: TcpStream,
    pub address: SocketAddr,
}
