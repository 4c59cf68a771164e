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

//! Client library for the IPC layer (§4.8/§6): a thin wrapper over one TCP
//! connection, speaking the same length-delimited framing
//! `dtrd::ipcagent::codec::IpcCodec` implements on the daemon side.
//!
//! Node/route administration moved to the external-router channel (§4.7) in
//! this rewrite — that's a separate, out-of-process protocol meant for a
//! routing daemon, not this application-facing client, so those methods
//! were dropped rather than ported.

pub mod error;
mod proto;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tokio_util::codec::{FramedRead, FramedWrite};

pub use error::Error;
use error::IpcStatus;
use proto::{
    DeliveryPolicyWire, IpcCodec, PatternKindWire, PayloadSpec, ReplayPolicyWire, Request,
    Response,
};

const OPEN_OPCODE: u16 = 0x4950; // "IP"
const PROTOCOL_VERSION: u16 = 1;

/// Handle to a registration bound on this session (§4.3/§4.8).
pub struct Registration {
    pub registration_id: u64,
}

pub struct Client {
    read: FramedRead<OwnedReadHalf, IpcCodec>,
    write: FramedWrite<OwnedWriteHalf, IpcCodec>,
}

impl Client {
    pub async fn new(addr: &str) -> Result<Self, Error> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|_| Error::InvalidUrl)?;
        handshake(&mut stream).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            read: FramedRead::new(read_half, IpcCodec::default()),
            write: FramedWrite::new(write_half, IpcCodec::default()),
        })
    }

    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        self.write.send(request).await?;
        let (status, response) = self
            .read
            .next()
            .await
            .ok_or(Error::UnexpectedResponse)??;
        if status != IpcStatus::Success {
            return Err(Error::Status(status));
        }
        Ok(response)
    }

    pub async fn local_eid(&mut self) -> Result<String, Error> {
        match self.call(Request::LocalEid).await? {
            Response::LocalEid { eid, .. } => Ok(eid),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn register(
        &mut self,
        pattern: &str,
        bundle_ack_required: bool,
    ) -> Result<Registration, Error> {
        let response = self
            .call(Request::Register {
                pattern: pattern.to_string(),
                pattern_kind: PatternKindWire::Exact,
                delivery_policy: DeliveryPolicyWire::Defer,
                replay_policy: ReplayPolicyWire::NewOnly,
                bundle_ack_required,
                expiration: None,
                reg_token: None,
            })
            .await?;
        match response {
            Response::Registered { registration_id } => Ok(Registration { registration_id }),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn unregister(&mut self, registration_id: u64) -> Result<(), Error> {
        self.call(Request::Unregister { registration_id })
            .await
            .map(|_| ())
    }

    pub async fn bind(&mut self, registration_id: u64) -> Result<(), Error> {
        self.call(Request::Bind { registration_id })
            .await
            .map(|_| ())
    }

    pub async fn unbind(&mut self, registration_id: u64) -> Result<(), Error> {
        self.call(Request::Unbind { registration_id })
            .await
            .map(|_| ())
    }

    pub async fn ack(&mut self, registration_id: u64, bundle_id: u64) -> Result<(), Error> {
        self.call(Request::Ack {
            registration_id,
            bundle_id,
        })
        .await
        .map(|_| ())
    }

    pub async fn cancel(&mut self, bundle_id: u64) -> Result<(), Error> {
        self.call(Request::Cancel { bundle_id }).await.map(|_| ())
    }

    /// Registers an ephemeral, ack-less registration good for one call. A
    /// bundle's own lifecycle does not depend on the registration that
    /// originated or received it, so this is only bookkeeping `dtrd`
    /// requires the request to carry.
    async fn ensure_registration(&mut self, pattern: &str) -> Result<u64, Error> {
        let registration = self.register(pattern, false).await?;
        Ok(registration.registration_id)
    }

    pub async fn submit_bundle(
        &mut self,
        target: &str,
        lifetime_ms: u64,
        data: &[u8],
        custody_requested: bool,
    ) -> Result<u64, Error> {
        let source_eid = self.local_eid().await?;
        let registration_id = self.ensure_registration(&source_eid).await?;
        let response = self
            .call(Request::Send {
                registration_id,
                destination: target.to_string(),
                lifetime_ms,
                custody_requested,
                payload: PayloadSpec::Inline(data.to_vec()),
            })
            .await;
        let _ = self.unregister(registration_id).await;
        match response? {
            Response::BundleId { bundle_id } => Ok(bundle_id),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    async fn recv_payload(&mut self, timeout_ms: u64) -> Result<Option<Vec<u8>>, Error> {
        match self.call(Request::Recv { timeout_ms }).await {
            Ok(Response::Delivery { payload, .. }) => Ok(Some(resolve_payload(payload).await?)),
            Err(Error::Status(IpcStatus::TimedOut)) => Ok(None),
            Err(e) => Err(e),
            Ok(_) => Err(Error::UnexpectedResponse),
        }
    }

    pub async fn receive_bundle(&mut self, endpoint: &str) -> Result<Vec<u8>, Error> {
        let registration_id = self.ensure_registration(endpoint).await?;
        self.bind(registration_id).await?;
        let result = self.recv_payload(30_000).await;
        let _ = self.unbind(registration_id).await;
        let _ = self.unregister(registration_id).await;
        result?.ok_or(Error::NoMessage)
    }

    /// Streams every bundle delivered to `endpoint` until the connection
    /// drops or the daemon returns an error. Each `recv` blocks this
    /// session only, the "suspends the IPC worker on that session, not
    /// the daemon" discipline described for this call (§5).
    pub async fn listen_bundles(
        &mut self,
        endpoint: &str,
    ) -> Result<impl Stream<Item = Result<Vec<u8>, Error>> + '_, Error> {
        let registration_id = self.ensure_registration(endpoint).await?;
        self.bind(registration_id).await?;
        Ok(async_stream::stream! {
            loop {
                match self.recv_payload(3_600_000).await {
                    Ok(Some(payload)) => yield Ok(payload),
                    Ok(None) => continue,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }
}

async fn resolve_payload(spec: PayloadSpec) -> Result<Vec<u8>, Error> {
    match spec {
        PayloadSpec::Inline(data) => Ok(data),
        PayloadSpec::TempFile(path) => {
            let data = tokio::fs::read(&path).await?;
            let _ = tokio::fs::remove_file(&path).await;
            Ok(data)
        }
    }
}

async fn handshake(stream: &mut TcpStream) -> Result<(), Error> {
    let word = ((OPEN_OPCODE as u32) << 16) | PROTOCOL_VERSION as u32;
    stream.write_all(&word.to_be_bytes()).await?;
    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    let reply = u32::from_be_bytes(reply);
    let opcode = (reply >> 16) as u16;
    let version = (reply & 0xffff) as u16;
    if opcode != OPEN_OPCODE {
        return Err(Error::UnexpectedResponse);
    }
    if version != PROTOCOL_VERSION {
        return Err(Error::VersionMismatch);
    }
    Ok(())
}
