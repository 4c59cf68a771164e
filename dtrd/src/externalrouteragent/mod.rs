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

//! External Router Channel (component 7): a duplex framed connection to an
//! out-of-process router. Snapshots, incremental events, commands and
//! queries all travel as one `Record` enum over a length-prefixed
//! `serde_cbor` frame, the same shape the teacher's `tcpcl` convergence
//! layer uses for its own wire messages, substituting CBOR for tcpcl's
//! hand-rolled binary encoding since this channel's payload is a
//! self-describing schema rather than a fixed binary layout (§9).

pub mod agent;
pub mod codec;
pub mod messages;
