use bytes::{Buf, BufMut, BytesMut};
use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};

use crate::{
    administrative_record::custody_signal::CustodySignalReason,
    endpoint::Endpoint,
    time::DtnTime,
};

/// A single run of consecutive custody-ids, `first_id..first_id+count`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CustodyIdRun {
    pub first_id: u64,
    pub count: u64,
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            break;
        }
        buf.put_u8(byte | 0x80);
    }
}

fn get_varint(buf: &mut &[u8]) -> Result<u64, AggregateCustodySignalError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        if !buf.has_remaining() {
            return Err(AggregateCustodySignalError::TruncatedRunList);
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift >= 64 {
            return Err(AggregateCustodySignalError::VarintOverflow);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AggregateCustodySignalError {
    TruncatedRunList,
    VarintOverflow,
    UnsortedRuns,
}

impl std::fmt::Display for AggregateCustodySignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateCustodySignalError::TruncatedRunList => {
                write!(f, "aggregate custody signal run list ended early")
            }
            AggregateCustodySignalError::VarintOverflow => {
                write!(f, "aggregate custody signal run list varint too large")
            }
            AggregateCustodySignalError::UnsortedRuns => {
                write!(f, "aggregate custody signal runs are not sorted and non-overlapping")
            }
        }
    }
}

impl std::error::Error for AggregateCustodySignalError {}

/// Encodes a sorted, gap-encoded list of custody-id runs.
///
/// Each run is `(gap, count)` where `gap` is the distance from the previous
/// run's end to this run's start (or the absolute first id, for the first
/// run), and `count` is `run.count - 1`. Both are unsigned LEB128 varints.
pub fn encode_runs(runs: &[CustodyIdRun]) -> Result<Vec<u8>, AggregateCustodySignalError> {
    let mut buf = BytesMut::new();
    put_varint(&mut buf, runs.len() as u64);
    let mut previous_end: u64 = 0;
    for run in runs {
        if run.count == 0 {
            return Err(AggregateCustodySignalError::UnsortedRuns);
        }
        if run.first_id < previous_end {
            return Err(AggregateCustodySignalError::UnsortedRuns);
        }
        let gap = run.first_id - previous_end;
        put_varint(&mut buf, gap);
        put_varint(&mut buf, run.count - 1);
        previous_end = run.first_id + run.count;
    }
    Ok(buf.to_vec())
}

pub fn decode_runs(data: &[u8]) -> Result<Vec<CustodyIdRun>, AggregateCustodySignalError> {
    let mut cursor = data;
    let num_runs = get_varint(&mut cursor)?;
    let mut runs = Vec::with_capacity(num_runs as usize);
    let mut previous_end: u64 = 0;
    for _ in 0..num_runs {
        let gap = get_varint(&mut cursor)?;
        let count = get_varint(&mut cursor)? + 1;
        let first_id = previous_end + gap;
        runs.push(CustodyIdRun { first_id, count });
        previous_end = first_id + count;
    }
    Ok(runs)
}

/// Aggregate Custody Signal: one custody acknowledgment covering every
/// custody-id in `runs`, all sharing the same `succeeded`/`reason`.
#[derive(Debug, PartialEq, Eq)]
pub struct AggregateCustodySignal {
    pub succeeded: bool,
    pub reason: CustodySignalReason,
    pub previous_custodian: Endpoint,
    pub signal_time: DtnTime,
    pub runs: Vec<CustodyIdRun>,
}

impl Serialize for AggregateCustodySignal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        struct RunBytes<'a>(&'a [u8]);
        impl Serialize for RunBytes<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(self.0)
            }
        }

        let encoded_runs = encode_runs(&self.runs).map_err(serde::ser::Error::custom)?;
        let mut seq = serializer.serialize_seq(Some(5))?;
        seq.serialize_element(&self.succeeded)?;
        seq.serialize_element(&self.reason)?;
        seq.serialize_element(&self.previous_custodian)?;
        seq.serialize_element(&self.signal_time)?;
        seq.serialize_element(&RunBytes(&encoded_runs))?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for AggregateCustodySignal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AggregateCustodySignalVisitor;
        impl<'de> Visitor<'de> for AggregateCustodySignalVisitor {
            type Value = AggregateCustodySignal;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("aggregate custody signal")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let length = seq.size_hint().ok_or(Error::custom(
                    "CBOR Array for AggregateCustodySignal must have a size hint",
                ))?;
                if length != 5 {
                    Err(Error::invalid_length(
                        length,
                        &"An AggregateCustodySignal must have 5 elements",
                    ))?;
                }
                let succeeded = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'succeeded'"))?;
                let reason = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'reason'"))?;
                let previous_custodian = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'previous_custodian'"))?;
                let signal_time = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'signal_time'"))?;
                let run_bytes: &[u8] = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'runs'"))?;
                let runs = decode_runs(run_bytes).map_err(Error::custom)?;
                Ok(AggregateCustodySignal {
                    succeeded,
                    reason,
                    previous_custodian,
                    signal_time,
                    runs,
                })
            }
        }
        deserializer.deserialize_seq(AggregateCustodySignalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::{CustodyIdRun, decode_runs, encode_runs};

    #[test]
    fn roundtrip_empty() {
        let runs: Vec<CustodyIdRun> = vec![];
        let encoded = encode_runs(&runs).unwrap();
        assert_eq!(decode_runs(&encoded).unwrap(), runs);
    }

    #[test]
    fn roundtrip_single_run() {
        let runs = vec![CustodyIdRun {
            first_id: 5,
            count: 3,
        }];
        let encoded = encode_runs(&runs).unwrap();
        assert_eq!(decode_runs(&encoded).unwrap(), runs);
    }

    #[test]
    fn roundtrip_multiple_gapped_runs() {
        let runs = vec![
            CustodyIdRun {
                first_id: 0,
                count: 1,
            },
            CustodyIdRun {
                first_id: 10,
                count: 5,
            },
            CustodyIdRun {
                first_id: 1_000_000,
                count: 1,
            },
        ];
        let encoded = encode_runs(&runs).unwrap();
        assert_eq!(decode_runs(&encoded).unwrap(), runs);
    }

    #[test]
    fn rejects_overlapping_runs() {
        let runs = vec![
            CustodyIdRun {
                first_id: 0,
                count: 10,
            },
            CustodyIdRun {
                first_id: 5,
                count: 1,
            },
        ];
        assert!(encode_runs(&runs).is_err());
    }

    /// Arbitrary sorted, deduplicated id sets compress into runs and
    /// reconstruct losslessly via run expansion.
    #[test]
    fn arbitrary_sorted_set_roundtrips_via_expansion() {
        let ids: Vec<u64> = vec![1, 2, 3, 7, 8, 20, 21, 22, 23, 100];
        let mut runs = Vec::new();
        for id in &ids {
            if let Some(last) = runs.last_mut() {
                let run: &mut CustodyIdRun = last;
                if run.first_id + run.count == *id {
                    run.count += 1;
                    continue;
                }
            }
            runs.push(CustodyIdRun {
                first_id: *id,
                count: 1,
            });
        }
        let encoded = encode_runs(&runs).unwrap();
        let decoded = decode_runs(&encoded).unwrap();
        let mut expanded = Vec::new();
        for run in decoded {
            for offset in 0..run.count {
                expanded.push(run.first_id + offset);
            }
        }
        assert_eq!(expanded, ids);
    }
}
