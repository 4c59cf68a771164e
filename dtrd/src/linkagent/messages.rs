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

use std::fmt::Display;

use actix::prelude::*;
use bp7::endpoint::Endpoint;
use url::Url;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LinkConnectionStatus {
    Disconnected,
    Connected,
    Connecting,
    Disconnecting,
}

impl Display for LinkConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LinkConnectionStatus::Disconnected => "Disconnected",
            LinkConnectionStatus::Connected => "Connected",
            LinkConnectionStatus::Connecting => "Connecting",
            LinkConnectionStatus::Disconnecting => "Disconnecting",
        })
    }
}

#[derive(Debug, Clone, Eq)]
pub struct Link {
    pub url: Url,
    pub connection_status: LinkConnectionStatus,
    pub remote_endpoint: Option<Endpoint>,
    /// A link added only as a side effect of an inbound connection, not via
    /// `AddLink`; dropped entirely once it disconnects instead of kept around
    /// to retry.
    pub temporary: bool,
    /// Administrative admission gate (external-router `SetLinkEnabled`/
    /// `Aos`/`Los`). A disabled link is actively disconnected and excluded
    /// from `TryConnect`'s reconnect sweep until re-enabled.
    pub enabled: bool,
    pub throttle_bps: Option<u64>,
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

#[derive(Message)]
#[rtype(result = "Vec<Link>")]
pub struct ListLinks {}

#[derive(Message)]
#[rtype(result = "")]
pub struct AddLink {
    pub url: Url,
}

#[derive(Message)]
#[rtype(result = "")]
pub struct RemoveLink {
    pub url: Url,
}

#[derive(Message)]
#[rtype(result = "")]
pub struct NotifyLinkConnected {
    pub url: Url,
    pub endpoint: Endpoint,
    pub max_bundle_size: u64,
}

#[derive(Message)]
#[rtype(result = "")]
pub struct NotifyLinkDisconnected {
    pub url: Url,
}

#[derive(Message)]
#[rtype(result = "")]
pub struct TryConnect {}

/// External-router `SetLinkEnabled`/`Aos`/`Los` (§4.7c): `Aos` (acquisition
/// of signal) and `Los` (loss of signal) are treated as the same admission
/// gate as an explicit enable/disable, since nothing in this workspace
/// schedules contact windows independently of administrative enablement.
#[derive(Message)]
#[rtype(result = "")]
pub struct SetLinkEnabled {
    pub url: Url,
    pub enabled: bool,
}

#[derive(Message)]
#[rtype(result = "")]
pub struct SetLinkThrottle {
    pub url: Url,
    pub bits_per_second: Option<u64>,
}
