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

use num_enum::TryFromPrimitive;

/// Mirrors `dtrd::common::error::IpcStatus` (§6) on the wire. Kept as its
/// own type here rather than depending on the daemon crate directly, the
/// same way a tonic-generated client never depended on the server crate
/// either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum IpcStatus {
    Success = 0,
    InvalidArgument = 1,
    CodecError = 2,
    CommunicationError = 3,
    ConnectFailure = 4,
    TimedOut = 5,
    PayloadTooLarge = 6,
    NotFound = 7,
    InternalError = 8,
    IllegalAfterPoll = 9,
    RegistrationInUse = 10,
    VersionMismatch = 11,
    UnknownMessageType = 12,
    NoStorageSpace = 13,
}

#[derive(Debug)]
pub enum Error {
    InvalidUrl,
    Io(std::io::Error),
    Codec(serde_cbor::Error),
    VersionMismatch,
    Status(IpcStatus),
    UnexpectedResponse,
    NoMessage,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidUrl => f.write_str("Invalid URL"),
            Error::Io(error) => {
                f.write_fmt(format_args!("Error when communicating with dtrd: {error}"))
            }
            Error::Codec(error) => {
                f.write_fmt(format_args!("Malformed IPC frame from dtrd: {error}"))
            }
            Error::VersionMismatch => f.write_str("dtrd speaks an incompatible IPC version"),
            Error::Status(status) => {
                f.write_fmt(format_args!("dtrd returned error status {status:?}"))
            }
            Error::UnexpectedResponse => f.write_str("dtrd sent a response of the wrong kind"),
            Error::NoMessage => f.write_str("No Message to be received"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_cbor::Error> for Error {
    fn from(err: serde_cbor::Error) -> Self {
        Error::Codec(err)
    }
}
