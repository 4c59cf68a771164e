use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::time::DtnTime;

/// Reason a custodian accepted or refused custody of a bundle.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u64)]
pub enum CustodySignalReason {
    NoAdditionalInformation = 0,
    RedundantReception = 3,
    DepletedStorage = 4,
    DestinationEndpointIDUnavailable = 5,
    NoKnownRouteToDestinationFromHere = 6,
    NoTimelyContactWithNextNodeOnRoute = 7,
    BlockUnintelligible = 8,
    LifetimeExpired = 9,
}

/// Custody acknowledgment for a single bundle.
///
/// Identifies the bundle by the `custody_id` the previous custodian itself
/// assigned and stamped onto the bundle (see `PreviousCustodianIdBlock`),
/// echoed back here rather than by the bundle's GBoF-id: the previous
/// custodian's own number is exactly what it needs to look its entry up
/// again, and unlike a GBoF tuple it is compact and, assigned in order,
/// lets an Aggregate Custody Signal's run-list actually compress.
#[derive(Debug, PartialEq, Eq)]
pub struct CustodySignal {
    pub succeeded: bool,
    pub reason: CustodySignalReason,
    pub custody_id: u64,
    pub signal_time: DtnTime,
}

impl Serialize for CustodySignal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.succeeded)?;
        seq.serialize_element(&self.reason)?;
        seq.serialize_element(&self.custody_id)?;
        seq.serialize_element(&self.signal_time)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CustodySignal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CustodySignalVisitor;
        impl<'de> Visitor<'de> for CustodySignalVisitor {
            type Value = CustodySignal;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("custody signal")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let length = seq.size_hint().ok_or(Error::custom(
                    "CBOR Array for CustodySignal must have a size hint",
                ))?;
                if length != 4 {
                    Err(Error::invalid_length(
                        length,
                        &"A CustodySignal must have 4 elements",
                    ))?;
                }
                let succeeded = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'succeeded'"))?;
                let reason = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'reason'"))?;
                let custody_id = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'custody_id'"))?;
                let signal_time = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'signal_time'"))?;
                Ok(CustodySignal {
                    succeeded,
                    reason,
                    custody_id,
                    signal_time,
                })
            }
        }
        deserializer.deserialize_seq(CustodySignalVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::{CustodySignal, CustodySignalReason};
    use crate::time::DtnTime;

    #[test]
    fn roundtrip() -> Result<(), serde_cbor::Error> {
        let signal = CustodySignal {
            succeeded: true,
            reason: CustodySignalReason::NoAdditionalInformation,
            custody_id: 1042,
            signal_time: DtnTime { timestamp: 42 },
        };
        let encoded = serde_cbor::to_vec(&signal)?;
        let decoded: CustodySignal = serde_cbor::from_slice(&encoded)?;
        assert_eq!(signal, decoded);
        Ok(())
    }

    #[test]
    fn roundtrip_refused() -> Result<(), serde_cbor::Error> {
        let signal = CustodySignal {
            succeeded: false,
            reason: CustodySignalReason::DepletedStorage,
            custody_id: 7,
            signal_time: DtnTime { timestamp: 42 },
        };
        let encoded = serde_cbor::to_vec(&signal)?;
        let decoded: CustodySignal = serde_cbor::from_slice(&encoded)?;
        assert_eq!(signal, decoded);
        Ok(())
    }
}
