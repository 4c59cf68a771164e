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

use thiserror::Error;

/// The error taxonomy every event handler in the daemon returns.
///
/// The categories below map 1:1 onto the four non-fatal categories plus
/// fatal errors: input errors and resource-exhaustion errors surface back
/// to whoever produced the event; protocol errors tear down the offending
/// channel; consistency errors are absorbed and only logged; fatal errors
/// abort the process after flushing in-flight durable writes.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("payload too large: {size} bytes exceeds the configured limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("no storage space available")]
    NoSpace,

    #[error("no memory available for queue")]
    NoMemory,

    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("consistency error: {0}")]
    Consistency(String),

    /// A payload file is missing for a bundle with an outstanding custody
    /// obligation. Discharged with `depleted-storage` and reported upstream
    /// rather than silently dropped like an ordinary consistency error.
    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("fatal error, aborting: {0}")]
    Fatal(String),

    #[error("not found")]
    NotFound,

    #[error("operation timed out")]
    TimedOut,

    #[error("connect failure: {0}")]
    ConnectFailure(String),

    #[error("illegal operation after poll")]
    IllegalAfterPoll,

    #[error("registration already in use")]
    RegistrationInUse,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("bundle already expired at admit time")]
    BundleExpired,
}

impl AgentError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AgentError::InvalidArgument(_)
            | AgentError::MalformedBundle(_)
            | AgentError::PayloadTooLarge { .. }
            | AgentError::BundleExpired => ErrorCategory::Input,
            AgentError::NoSpace | AgentError::NoMemory => ErrorCategory::ResourceExhaustion,
            AgentError::VersionMismatch { .. }
            | AgentError::UnknownMessageType(_)
            | AgentError::MalformedFrame(_) => ErrorCategory::Protocol,
            AgentError::Consistency(_) | AgentError::DataLoss(_) => ErrorCategory::Consistency,
            AgentError::Fatal(_) => ErrorCategory::Fatal,
            AgentError::NotFound
            | AgentError::TimedOut
            | AgentError::ConnectFailure(_)
            | AgentError::IllegalAfterPoll
            | AgentError::RegistrationInUse
            | AgentError::Internal(_)
            | AgentError::Codec(_) => ErrorCategory::Input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    ResourceExhaustion,
    Protocol,
    Consistency,
    Fatal,
}

impl From<bp7::SerializationError> for AgentError {
    fn from(e: bp7::SerializationError) -> Self {
        AgentError::Codec(e.to_string())
    }
}

impl From<bp7::FragmentationError> for AgentError {
    fn from(e: bp7::FragmentationError) -> Self {
        AgentError::Codec(e.to_string())
    }
}

impl From<rocksdb::Error> for AgentError {
    fn from(e: rocksdb::Error) -> Self {
        AgentError::Fatal(format!("storage engine error: {e}"))
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Internal(format!("io error: {e}"))
    }
}

/// Numeric error codes returned over the IPC wire (§6). Stable; never
/// renumber a variant once shipped, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

impl From<&AgentError> for IpcStatus {
    fn from(e: &AgentError) -> Self {
        match e {
            AgentError::InvalidArgument(_)
            | AgentError::MalformedBundle(_)
            | AgentError::BundleExpired => IpcStatus::InvalidArgument,
            AgentError::PayloadTooLarge { .. } => IpcStatus::PayloadTooLarge,
            AgentError::NoSpace => IpcStatus::NoStorageSpace,
            AgentError::NoMemory => IpcStatus::NoStorageSpace,
            AgentError::VersionMismatch { .. } => IpcStatus::VersionMismatch,
            AgentError::UnknownMessageType(_) => IpcStatus::UnknownMessageType,
            AgentError::MalformedFrame(_) => IpcStatus::CommunicationError,
            AgentError::Consistency(_) | AgentError::DataLoss(_) | AgentError::Fatal(_) => {
                IpcStatus::InternalError
            }
            AgentError::NotFound => IpcStatus::NotFound,
            AgentError::TimedOut => IpcStatus::TimedOut,
            AgentError::ConnectFailure(_) => IpcStatus::ConnectFailure,
            AgentError::IllegalAfterPoll => IpcStatus::IllegalAfterPoll,
            AgentError::RegistrationInUse => IpcStatus::RegistrationInUse,
            AgentError::Internal(_) => IpcStatus::InternalError,
            AgentError::Codec(_) => IpcStatus::CodecError,
        }
    }
}

impl From<AgentError> for IpcStatus {
    fn from(e: AgentError) -> Self {
        (&e).into()
    }
}
