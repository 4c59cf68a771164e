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

//! IPC Layer (component 8): framed request/response protocol between the
//! `client` library and this daemon, generalized from the teacher's
//! `clientgrpcagent` tonic service into the bit-exact `type ∥ len ∥
//! payload` / `status ∥ len ∥ payload` framing of spec.md §4.8/§6.

pub mod agent;
pub mod codec;
pub mod messages;
pub mod session;
