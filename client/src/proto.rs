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

//! Client-side mirror of `dtrd::ipcagent::{messages, codec}` (§6). This is
//! the same split a tonic-generated client stub has from its server
//! counterpart: both sides are generated from (here: hand-written to) the
//! same wire contract, but neither depends on the other's crate.

use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, IpcStatus};

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

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DeliveryPolicyWire {
    Drop,
    Defer,
    ExecScript,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ReplayPolicyWire {
    NewOnly,
    None,
    AllQueued,
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

/// Mirrors `dtrd::ipcagent::codec::IpcCodec`, roles reversed: this side
/// encodes requests and decodes status-prefixed responses.
#[derive(Debug, Default)]
pub struct IpcCodec {
    header: Option<(u32, u32)>,
}

impl Encoder<Request> for IpcCodec {
    type Error = Error;

    fn encode(&mut self, request: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let request_type: u8 = request.request_type().into();
        let payload = serde_cbor::to_vec(&request)?;
        dst.put_u8(request_type);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for IpcCodec {
    type Item = (IpcStatus, Response);
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (status_raw, len) = match self.header {
            Some(header) => header,
            None => {
                if src.len() < 8 {
                    return Ok(None);
                }
                let status_raw = u32::from_be_bytes(src[0..4].try_into().unwrap());
                let len = u32::from_be_bytes(src[4..8].try_into().unwrap());
                src.advance(8);
                self.header = Some((status_raw, len));
                (status_raw, len)
            }
        };
        if src.len() < len as usize {
            src.reserve(len as usize - src.len());
            return Ok(None);
        }
        let payload = src.split_to(len as usize);
        self.header = None;
        let status = IpcStatus::try_from(status_raw).map_err(|_| Error::UnexpectedResponse)?;
        let response: Response = serde_cbor::from_slice(&payload)?;
        Ok(Some((status, response)))
    }
}
