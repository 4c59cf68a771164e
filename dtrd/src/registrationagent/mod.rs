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

//! Registration Table (component 4): local endpoint subscribers, their
//! delivery/replay policy, and per-registration delivery queues.

pub mod agent;
pub mod messages;
pub mod store;

use bp7::endpoint::Endpoint;
use serde::{Deserialize, Serialize};

/// How a registration's bound pattern is matched against a bundle's
/// destination. Patterns support exact match, scheme+host prefix, and
/// wildcard tails, matching the vocabulary the registration table is
/// keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointPattern {
    Exact(String),
    SchemeHostPrefix(String),
    WildcardTail(String),
}

impl EndpointPattern {
    pub fn matches(&self, destination: &Endpoint) -> bool {
        let dest = destination.to_string();
        match self {
            EndpointPattern::Exact(pattern) => dest == *pattern,
            EndpointPattern::SchemeHostPrefix(prefix) => dest.starts_with(prefix.as_str()),
            EndpointPattern::WildcardTail(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => dest.starts_with(prefix),
                None => dest == *pattern,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryPolicy {
    Drop,
    Defer,
    ExecScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayPolicy {
    NewOnly,
    None,
    AllQueued,
}
