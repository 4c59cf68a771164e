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

use std::convert::TryFrom;

use serde::{
    Deserialize, Serialize,
    de::{Error, Visitor},
    ser::SerializeSeq,
};
use serde_cbor::Serializer;

use crate::Validate;

/// Extended Class of Service block.
///
/// Carries forwarding priority beyond the three `BundleFlags` priority bits:
/// an ordinal for fine-grained same-priority ordering, a critical flag, and
/// an opaque flow label a routing agent may group bundles by.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EcosBlock {
    pub critical: bool,
    pub ordinal: u8,
    pub flow_label: u64,
}

impl Serialize for EcosBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut vec = Vec::new();
        let inner_ser = &mut Serializer::new(&mut vec);
        let mut seq = serde::Serializer::serialize_seq(inner_ser, Some(3))
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.critical)
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.ordinal)
            .map_err(serde::ser::Error::custom)?;
        seq.serialize_element(&self.flow_label)
            .map_err(serde::ser::Error::custom)?;
        seq.end().map_err(serde::ser::Error::custom)?;

        serializer.serialize_bytes(&vec)
    }
}

impl<'de> Deserialize<'de> for EcosBlock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct EcosBlockVisitor;
        impl<'de> Visitor<'de> for EcosBlockVisitor {
            type Value = EcosBlock;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("Extended Class of Service Block")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let size = seq.size_hint().ok_or_else(|| {
                    Error::custom("Ecos Block must know the length of its contents")
                })?;
                if size != 3 {
                    return Err(Error::invalid_length(size, &"Ecos Block has 3 elements"));
                }

                let critical: bool = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'critical'"))?;
                let ordinal: u8 = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'ordinal'"))?;
                let flow_label: u64 = seq
                    .next_element()?
                    .ok_or(Error::custom("Error for field 'flow_label'"))?;
                Ok(EcosBlock {
                    critical,
                    ordinal,
                    flow_label,
                })
            }
        }
        deserializer.deserialize_seq(EcosBlockVisitor)
    }
}

impl Validate for EcosBlock {
    fn validate(&self) -> bool {
        !self.critical || self.ordinal == 254
    }
}

impl TryFrom<Vec<u8>> for EcosBlock {
    type Error = serde_cbor::Error;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        serde_cbor::from_slice(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::EcosBlock;
    use crate::Validate;

    #[test]
    fn critical_requires_ordinal_254() {
        let block = EcosBlock {
            critical: true,
            ordinal: 10,
            flow_label: 0,
        };
        assert!(!block.validate());

        let block = EcosBlock {
            critical: true,
            ordinal: 254,
            flow_label: 0,
        };
        assert!(block.validate());
    }

    #[test]
    fn non_critical_any_ordinal() {
        let block = EcosBlock {
            critical: false,
            ordinal: 42,
            flow_label: 7,
        };
        assert!(block.validate());
    }
}
