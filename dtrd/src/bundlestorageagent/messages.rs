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

use bp7::endpoint::Endpoint;

use crate::bundlestorageagent::{State, StoredBundleRef};

use actix::prelude::*;

/// Which of the four I2/P4 obligation counters a reservation belongs to.
/// A bundle is freed only once all four read zero (§3, §4.2, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    RegistrationPending,
    LinkReservation,
    CustodyObligation,
    ExternalRouterRef,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct EventNewBundleStored {
    pub bundle: StoredBundleRef,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct EventBundleUpdated {
    pub bundle: StoredBundleRef,
}

#[derive(Message)]
#[rtype(result = "Result<u64, ()>")]
pub struct StoreBundle {
    pub bundle_data: Vec<u8>,
}

/// Admits a bundle this daemon just originated (as opposed to one received
/// over a convergence layer). Returns the id the Bundle Store assigned it,
/// so an originator such as the IPC `send` handler can hand it back to the
/// caller.
#[derive(Message)]
#[rtype(result = "Result<u64, ()>")]
pub struct StoreNewBundle {
    pub bundle_data: Vec<u8>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct UpdateBundle {
    pub bundleref: StoredBundleRef,
    pub new_state: State,
    pub new_data: Option<Vec<u8>>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct FragmentBundle {
    pub bundleref: StoredBundleRef,
    pub target_size: u64,
}

#[derive(Message)]
#[rtype(result = "Result<Vec<StoredBundleRef>, String>")]
pub struct GetBundleForDestination {
    pub destination: Endpoint,
}

#[derive(Message)]
#[rtype(result = "Result<Vec<StoredBundleRef>, String>")]
pub struct GetBundleForNode {
    pub destination: Endpoint,
}

/// `fetch(id)` (§4.2): look up a still-admitted bundle by id.
#[derive(Message)]
#[rtype(result = "Option<StoredBundleRef>")]
pub struct GetBundle {
    pub bundle_id: u64,
}

/// `enumerate()` (§4.2): a snapshot of every currently-admitted bundle, for
/// reload-adjacent scans (registration initial-load, routing recompute).
#[derive(Message)]
#[rtype(result = "Vec<StoredBundleRef>")]
pub struct EnumerateBundles {}

/// Adds one reservation of `kind` against a bundle's obligation counters.
/// Taken out by whichever agent is about to hold the bundle pending (a
/// registration queue, a link queue, a custody entry, an external-router
/// reference) so the Bundle Store knows it is not yet freeable (I2/P4).
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReserveBundle {
    pub bundle_id: u64,
    pub kind: RefKind,
}

/// Releases a reservation taken by `ReserveBundle`. Once every counter is
/// back to zero and the bundle's lifecycle state is terminal, the Bundle
/// Store unlinks its payload and removes its metadata row.
#[derive(Message)]
#[rtype(result = "()")]
pub struct ReleaseBundle {
    pub bundle_id: u64,
    pub kind: RefKind,
}
