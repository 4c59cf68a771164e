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

//! `len:u32-be ∥ encoded-record[len]` framing (§6), the same
//! length-prefix-then-payload shape `tcpcl::v4::messages::Codec` uses, with
//! `serde_cbor` standing in for tcpcl's fixed binary layout since the
//! external-router record is schema-defined, not byte-pinned (§9).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::messages::Record;

#[derive(Debug)]
pub enum Errors {
    Io(std::io::Error),
    Codec(serde_cbor::Error),
    FrameTooLarge(u32),
}

impl From<std::io::Error> for Errors {
    fn from(e: std::io::Error) -> Self {
        Errors::Io(e)
    }
}

#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_frame_bytes: u32,
}

impl RecordCodec {
    pub fn new(max_frame_bytes: u64) -> Self {
        Self {
            max_frame_bytes: max_frame_bytes.try_into().unwrap_or(u32::MAX),
        }
    }
}

impl Decoder for RecordCodec {
    type Item = Record;
    type Error = Errors;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[0..4].try_into().unwrap());
        if len > self.max_frame_bytes {
            return Err(Errors::FrameTooLarge(len));
        }
        if src.len() < 4 + len as usize {
            src.reserve(4 + len as usize - src.len());
            return Ok(None);
        }
        src.advance(4);
        let payload = src.split_to(len as usize);
        let record = serde_cbor::from_slice(&payload).map_err(Errors::Codec)?;
        Ok(Some(record))
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = Errors;

    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_cbor::to_vec(&item).map_err(Errors::Codec)?;
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::externalrouteragent::messages::Event;

    #[test]
    fn round_trips_a_record() {
        let mut codec = RecordCodec::new(1024 * 1024);
        let mut buf = BytesMut::new();
        let record = Record::Event(Event::BundleFreed { bundle_id: 42 });
        codec.encode(record, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            Record::Event(Event::BundleFreed { bundle_id }) => assert_eq!(bundle_id, 42),
            other => panic!("unexpected record: {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut codec = RecordCodec::new(4);
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.extend_from_slice(&[0u8; 10]);
        assert!(matches!(codec.decode(&mut buf), Err(Errors::FrameTooLarge(100))));
    }

    #[test]
    fn waits_for_a_complete_frame() {
        let mut codec = RecordCodec::new(1024);
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.extend_from_slice(&[0u8; 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
