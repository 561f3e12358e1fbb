// Copyright (c) 2024-2025, Hound contributors
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright
//    notice, this list of conditions and the following disclaimer in the
//    documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its
//    contributors may be used to endorse or promote products derived
//    from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! The closed error taxonomy shared by every Hound driver and the engine.
//!
//! Authors of new drivers should map their failures onto one of these
//! variants. If none fits, a new variant can be added here (it requires a
//! new release of this crate) but keep it generic enough to be useful
//! outside of a single driver -- don't add a value specific to one vendor's
//! wire format; add a general value and put vendor detail in the attached
//! string.

use std::fmt;

use crate::types::{DataId, Period};

/// A stable, fieldless classification of an [`Error`]. `spec.md` describes
/// these as small negative integers forming a closed ABI; in Rust the
/// closed set is the enum itself; no particular integer encoding is part
/// of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Oom,
    Io,
    Interrupted,
    NullValue,
    InvalidValue,
    InvalidString,
    QueueTooSmall,
    TooMuchDataRequested,
    DuplicateDataRequested,
    DriverAlreadyRegistered,
    DriverNotRegistered,
    DriverInUse,
    DriverAlreadyPresent,
    DriverUnsupported,
    DriverFail,
    ConflictingDrivers,
    MissingDeviceIds,
    DevDoesNotExist,
    NoDataRequested,
    DataIdDoesNotExist,
    PeriodUnsupported,
    IdNotInSchema,
    DescDuplicate,
    CtxActive,
    CtxNotActive,
    EmptyQueue,
    MissingCallback,
}

/// Returns the stable, human-readable string associated with an
/// [`ErrorCode`]. This is the Rust equivalent of the C ABI's
/// `strerror(code) -> static string` entry point (`spec.md` §6).
pub fn strerror(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Oom => "out of memory",
        ErrorCode::Io => "I/O error",
        ErrorCode::Interrupted => "interrupted",
        ErrorCode::NullValue => "null value",
        ErrorCode::InvalidValue => "invalid value",
        ErrorCode::InvalidString => "invalid string",
        ErrorCode::QueueTooSmall => "queue capacity too small",
        ErrorCode::TooMuchDataRequested => "too much data requested",
        ErrorCode::DuplicateDataRequested => "duplicate data requested",
        ErrorCode::DriverAlreadyRegistered => "driver already registered",
        ErrorCode::DriverNotRegistered => "driver not registered",
        ErrorCode::DriverInUse => "driver in use",
        ErrorCode::DriverAlreadyPresent => "driver already present on path",
        ErrorCode::DriverUnsupported => "operation unsupported by driver",
        ErrorCode::DriverFail => "driver reported a failure",
        ErrorCode::ConflictingDrivers => "conflicting drivers",
        ErrorCode::MissingDeviceIds => "missing device ids",
        ErrorCode::DevDoesNotExist => "device path does not exist",
        ErrorCode::NoDataRequested => "no data requested",
        ErrorCode::DataIdDoesNotExist => "data id does not exist",
        ErrorCode::PeriodUnsupported => "period unsupported by driver",
        ErrorCode::IdNotInSchema => "id not in schema",
        ErrorCode::DescDuplicate => "duplicate descriptor",
        ErrorCode::CtxActive => "context is active",
        ErrorCode::CtxNotActive => "context is not active",
        ErrorCode::EmptyQueue => "queue is empty",
        ErrorCode::MissingCallback => "missing callback",
    }
}

/// Enumerates all the errors that can be reported by Hound. Each variant
/// carries whatever detail is useful for a log message; [`Error::code`]
/// recovers the stable [`ErrorCode`] for callers that want to match on it
/// without caring about the attached detail.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Oom,
    Io(String),
    Interrupted,

    NullValue,
    InvalidValue(String),
    InvalidString(String),
    QueueTooSmall,
    TooMuchDataRequested { requested: usize, max: usize },
    DuplicateDataRequested(DataId),

    DriverAlreadyRegistered(String),
    DriverNotRegistered(String),
    DriverInUse(String),
    DriverAlreadyPresent(String),
    DriverUnsupported(String),
    DriverFail(String),
    ConflictingDrivers { data_id: DataId, holder: String },
    MissingDeviceIds,
    DevDoesNotExist(String),

    NoDataRequested,
    DataIdDoesNotExist(DataId),
    PeriodUnsupported { data_id: DataId, period_ns: Period },
    IdNotInSchema(DataId),
    DescDuplicate(DataId),

    CtxActive,
    CtxNotActive,
    EmptyQueue,
    MissingCallback,
}

impl Error {
    /// Maps this error onto its stable, fieldless [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Oom => ErrorCode::Oom,
            Error::Io(_) => ErrorCode::Io,
            Error::Interrupted => ErrorCode::Interrupted,
            Error::NullValue => ErrorCode::NullValue,
            Error::InvalidValue(_) => ErrorCode::InvalidValue,
            Error::InvalidString(_) => ErrorCode::InvalidString,
            Error::QueueTooSmall => ErrorCode::QueueTooSmall,
            Error::TooMuchDataRequested { .. } => {
                ErrorCode::TooMuchDataRequested
            }
            Error::DuplicateDataRequested(_) => {
                ErrorCode::DuplicateDataRequested
            }
            Error::DriverAlreadyRegistered(_) => {
                ErrorCode::DriverAlreadyRegistered
            }
            Error::DriverNotRegistered(_) => ErrorCode::DriverNotRegistered,
            Error::DriverInUse(_) => ErrorCode::DriverInUse,
            Error::DriverAlreadyPresent(_) => ErrorCode::DriverAlreadyPresent,
            Error::DriverUnsupported(_) => ErrorCode::DriverUnsupported,
            Error::DriverFail(_) => ErrorCode::DriverFail,
            Error::ConflictingDrivers { .. } => ErrorCode::ConflictingDrivers,
            Error::MissingDeviceIds => ErrorCode::MissingDeviceIds,
            Error::DevDoesNotExist(_) => ErrorCode::DevDoesNotExist,
            Error::NoDataRequested => ErrorCode::NoDataRequested,
            Error::DataIdDoesNotExist(_) => ErrorCode::DataIdDoesNotExist,
            Error::PeriodUnsupported { .. } => ErrorCode::PeriodUnsupported,
            Error::IdNotInSchema(_) => ErrorCode::IdNotInSchema,
            Error::DescDuplicate(_) => ErrorCode::DescDuplicate,
            Error::CtxActive => ErrorCode::CtxActive,
            Error::CtxNotActive => ErrorCode::CtxNotActive,
            Error::EmptyQueue => ErrorCode::EmptyQueue,
            Error::MissingCallback => ErrorCode::MissingCallback,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(detail) => write!(f, "I/O error: {}", detail),
            Error::InvalidValue(detail) => write!(f, "invalid value: {}", detail),
            Error::InvalidString(detail) => {
                write!(f, "invalid string: {}", detail)
            }
            Error::TooMuchDataRequested { requested, max } => write!(
                f,
                "too much data requested ({} requests, max {})",
                requested, max
            ),
            Error::DuplicateDataRequested(id) => {
                write!(f, "duplicate data requested for id {}", id)
            }
            Error::DriverAlreadyRegistered(name) => {
                write!(f, "driver '{}' is already registered", name)
            }
            Error::DriverNotRegistered(name) => {
                write!(f, "no driver named '{}' is registered", name)
            }
            Error::DriverInUse(path) => {
                write!(f, "driver instance at '{}' is in use", path)
            }
            Error::DriverAlreadyPresent(path) => {
                write!(f, "a driver is already present at '{}'", path)
            }
            Error::DriverUnsupported(detail) => {
                write!(f, "unsupported by driver: {}", detail)
            }
            Error::DriverFail(detail) => {
                write!(f, "driver reported a failure: {}", detail)
            }
            Error::ConflictingDrivers { data_id, holder } => write!(
                f,
                "data id {} is already claimed by driver '{}'",
                data_id, holder
            ),
            Error::DevDoesNotExist(path) => {
                write!(f, "no device exists at '{}'", path)
            }
            Error::DataIdDoesNotExist(id) => {
                write!(f, "data id {} does not exist", id)
            }
            Error::PeriodUnsupported { data_id, period_ns } => write!(
                f,
                "period {} ns unsupported for data id {}",
                period_ns, data_id
            ),
            Error::IdNotInSchema(id) => {
                write!(f, "data id {} is not present in the schema", id)
            }
            Error::DescDuplicate(id) => {
                write!(f, "duplicate schema descriptor for data id {}", id)
            }
            other => write!(f, "{}", strerror(other.code())),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::DriverFail(String::from("request channel is closed"))
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_error: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::DriverFail(String::from("reply channel was dropped"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every `ErrorCode` variant must have a `strerror` entry -- if this
    /// compiles and doesn't panic, the match in `strerror` is exhaustive.
    #[test]
    fn strerror_covers_every_code() {
        let codes = [
            ErrorCode::Oom,
            ErrorCode::Io,
            ErrorCode::Interrupted,
            ErrorCode::NullValue,
            ErrorCode::InvalidValue,
            ErrorCode::InvalidString,
            ErrorCode::QueueTooSmall,
            ErrorCode::TooMuchDataRequested,
            ErrorCode::DuplicateDataRequested,
            ErrorCode::DriverAlreadyRegistered,
            ErrorCode::DriverNotRegistered,
            ErrorCode::DriverInUse,
            ErrorCode::DriverAlreadyPresent,
            ErrorCode::DriverUnsupported,
            ErrorCode::DriverFail,
            ErrorCode::ConflictingDrivers,
            ErrorCode::MissingDeviceIds,
            ErrorCode::DevDoesNotExist,
            ErrorCode::NoDataRequested,
            ErrorCode::DataIdDoesNotExist,
            ErrorCode::PeriodUnsupported,
            ErrorCode::IdNotInSchema,
            ErrorCode::DescDuplicate,
            ErrorCode::CtxActive,
            ErrorCode::CtxNotActive,
            ErrorCode::EmptyQueue,
            ErrorCode::MissingCallback,
        ];

        for code in codes {
            assert!(!strerror(code).is_empty());
        }
    }

    #[test]
    fn code_roundtrips_through_variant_construction() {
        let err = Error::PeriodUnsupported {
            data_id: 7,
            period_ns: 42,
        };
        assert_eq!(err.code(), ErrorCode::PeriodUnsupported);
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn fieldless_variants_fall_back_to_strerror_for_display() {
        assert_eq!(Error::CtxActive.to_string(), strerror(ErrorCode::CtxActive));
    }
}
