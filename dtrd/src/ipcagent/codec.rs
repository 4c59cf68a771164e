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

//! Bit-exact IPC framing (§6): request is `type:u8 ∥ len:u32-be ∥
//! payload[len]`, response is `status:u32-be ∥ len:u32-be ∥ payload[len]`.
//! Same length-prefix-then-payload shape as `tcpcl::v4::messages::Codec`
//! and the external-router `RecordCodec`, with a leading discriminant byte
//! for requests the way tcpcl's own message type byte works.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::common::error::IpcStatus;

use super::messages::{Request, RequestType, Response};

#[derive(Debug)]
pub enum Errors {
    Io(std::io::Error),
    Codec(serde_cbor::Error),
    InvalidRequestType(u8),
    RequestTypeMismatch,
    PayloadTooLarge(u32),
}

impl From<std::io::Error> for Errors {
    fn from(e: std::io::Error) -> Self {
        Errors::Io(e)
    }
}

#[derive(Debug, Clone)]
pub struct IpcCodec {
    max_payload_bytes: u32,
    curr_type: Option<RequestType>,
}

impl IpcCodec {
    pub fn new(max_payload_bytes: u64) -> Self {
        Self {
            max_payload_bytes: max_payload_bytes.try_into().unwrap_or(u32::MAX),
            curr_type: None,
        }
    }
}

impl Decoder for IpcCodec {
    type Item = Request;
    type Error = Errors;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.curr_type.is_none() {
            if src.is_empty() {
                return Ok(None);
            }
            let byte = src[0];
            let request_type = byte
                .try_into()
                .map_err(|_| Errors::InvalidRequestType(byte))?;
            src.advance(1);
            self.curr_type = Some(request_type);
        }

        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[0..4].try_into().unwrap());
        if len > self.max_payload_bytes {
            return Err(Errors::PayloadTooLarge(len));
        }
        if src.len() < 4 + len as usize {
            src.reserve(4 + len as usize - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload = src.split_to(len as usize);
        let request: Request = serde_cbor::from_slice(&payload).map_err(Errors::Codec)?;
        if request.request_type() != self.curr_type.take().unwrap() {
            return Err(Errors::RequestTypeMismatch);
        }
        Ok(Some(request))
    }
}

impl Encoder<(IpcStatus, Response)> for IpcCodec {
    type Error = Errors;

    fn encode(
        &mut self,
        (status, response): (IpcStatus, Response),
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let payload = serde_cbor::to_vec(&response).map_err(Errors::Codec)?;
        dst.put_u32(status as u32);
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipcagent::messages::PayloadSpec;

    #[test]
    fn round_trips_a_request() {
        let mut codec = IpcCodec::new(1024 * 1024);
        let mut buf = BytesMut::new();
        let request = Request::Ack {
            registration_id: 1,
            bundle_id: 2,
        };
        let payload = serde_cbor::to_vec(&request).unwrap();
        buf.put_u8(RequestType::Ack.into());
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(&payload);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(
            decoded,
            Request::Ack {
                registration_id: 1,
                bundle_id: 2
            }
        ));
    }

    #[test]
    fn encodes_a_response_with_status_prefix() {
        let mut codec = IpcCodec::new(1024 * 1024);
        let mut buf = BytesMut::new();
        codec
            .encode(
                (IpcStatus::Success, Response::BundleId { bundle_id: 7 }),
                &mut buf,
            )
            .unwrap();
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 0);
    }

    #[test]
    fn rejects_oversized_payload_declared_length() {
        let mut codec = IpcCodec::new(4);
        let mut buf = BytesMut::new();
        buf.put_u8(RequestType::CancelPoll.into());
        buf.put_u32(100);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(Errors::PayloadTooLarge(100))
        ));
    }

    #[test]
    fn payload_spec_round_trips_through_cbor() {
        let spec = PayloadSpec::TempFile("/tmp/foo".into());
        let encoded = serde_cbor::to_vec(&spec).unwrap();
        let decoded: PayloadSpec = serde_cbor::from_slice(&encoded).unwrap();
        assert!(matches!(decoded, PayloadSpec::TempFile(p) if p == "/tmp/foo"));
    }
}
