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

//! Defines the fundamental data model shared by every driver and the
//! engine: data identifiers, the schema/descriptor types that describe a
//! driver's streams, and the `Record` a driver hands back to the engine.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// Opaque identifier of a semantic data stream (e.g. "accelerometer X").
/// Unique within one driver's schema.
pub type DataId = u32;

/// Identifier the core assigns to a driver instance when it registers.
/// Stable for the lifetime of the instance.
pub type DeviceId = u8;

/// Monotonically increasing, per-driver-instance sequence number. Starts
/// at 0 when the instance starts producing.
pub type SeqNo = u64;

/// Nanoseconds between successive samples. `0` means "on-demand" (pull
/// mode); any positive value must be one the driver advertises for the
/// requested data id.
pub type Period = u64;

/// The maximum number of records a single `parse`/`poll` invocation may
/// emit. Part of the stable ABI (`spec.md` §6).
pub const MAX_RECORDS_PER_CALL: usize = 1000;

/// The maximum number of entries a `RequestList` may contain. Part of the
/// stable ABI.
pub const MAX_DATA_REQ: usize = 1000;

/// Maximum length, including the NUL terminator, of a device name
/// returned from a driver's `device_name` hook. Part of the stable ABI.
pub const DEVICE_NAME_MAX: usize = 32;

/// Engineering units a [`DataFormat`] field can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unit {
    Degree,
    Kelvin,
    KgPerS,
    Meter,
    MeterPerS,
    MeterPerS2,
    None,
    Pascal,
    Percent,
    Rad,
    RadPerS,
    Nanosecond,
}

/// Scalar widths a [`DataFormat`] field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Type {
    Float,
    Double,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    /// Raw bytes; see [`DataFormat::length`] for the "remainder of
    /// payload" convention.
    Bytes,
}

impl Type {
    /// The width, in bytes, of one value of this type, or `None` for
    /// [`Type::Bytes`] (whose length is given by the enclosing
    /// [`DataFormat`]).
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            Type::Float | Type::I32 | Type::U32 => Some(4),
            Type::Double | Type::I64 | Type::U64 => Some(8),
            Type::I8 | Type::U8 => Some(1),
            Type::I16 | Type::U16 => Some(2),
            Type::Bytes => None,
        }
    }
}

/// One named, typed field within a record's payload.
///
/// `length == 0` means "remainder of the payload" -- it may only be the
/// last `DataFormat` in a [`SchemaDescriptor`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataFormat {
    pub name: String,
    pub unit: Unit,
    pub offset: u32,
    pub length: u32,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// The immutable, per-data-id description a schema file (parsed upstream,
/// out of scope here) hands to the engine. Deep-copied into driver
/// storage at driver init and kept for the life of the instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemaDescriptor {
    pub data_id: DataId,
    pub name: String,
    pub formats: Vec<DataFormat>,
}

/// A schema entry annotated with what a live driver instance actually
/// supports, as reported by the driver's `datadesc` hook.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DriverDescriptor {
    pub enabled: bool,
    pub advertised_periods: Vec<Period>,
    pub schema: Arc<SchemaDescriptor>,
}

/// One timestamped sample produced by a driver.
///
/// The payload is owned by the record; once the last queue it was fanned
/// out to drops its reference, the payload is freed.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub seqno: SeqNo,
    pub data_id: DataId,
    pub dev_id: DeviceId,
    pub timestamp: SystemTime,
    pub payload: Box<[u8]>,
}

impl Record {
    /// Number of bytes in the payload. Used by
    /// [`crate::driver::RequestList`]-driven byte-budgeted drains.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// A single subscription request: a data id at a period. `period_ns == 0`
/// requests on-demand (pull) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataRequest {
    pub data_id: DataId,
    pub period_ns: Period,
}

/// An ordered, duplicate-free list of [`DataRequest`]s, validated against
/// the stable ABI limit [`MAX_DATA_REQ`] at construction time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestList(Vec<DataRequest>);

impl RequestList {
    /// Builds a `RequestList`, enforcing `spec.md` invariants P4/P5: no
    /// more than [`MAX_DATA_REQ`] entries, and no duplicate `data_id`.
    pub fn new(requests: Vec<DataRequest>) -> Result<Self, Error> {
        if requests.is_empty() {
            return Err(Error::NoDataRequested);
        }

        if requests.len() > MAX_DATA_REQ {
            return Err(Error::TooMuchDataRequested {
                requested: requests.len(),
                max: MAX_DATA_REQ,
            });
        }

        let mut seen = std::collections::HashSet::with_capacity(requests.len());

        for req in &requests {
            if !seen.insert(req.data_id) {
                return Err(Error::DuplicateDataRequested(req.data_id));
            }
        }

        Ok(RequestList(requests))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataRequest> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the subset of this list whose `data_id` the predicate
    /// accepts. Used by the engine to partition a request list per
    /// driver instance (`spec.md` §4.7 step 3).
    pub fn partition_by<F: Fn(DataId) -> bool>(&self, pred: F) -> Vec<DataRequest> {
        self.0.iter().copied().filter(|r| pred(r.data_id)).collect()
    }
}

impl fmt::Display for RequestList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, req) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}ns", req.data_id, req.period_ns)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(data_id: DataId, period_ns: Period) -> DataRequest {
        DataRequest { data_id, period_ns }
    }

    #[test]
    fn rejects_empty_request_list() {
        let err = RequestList::new(Vec::new()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::NoDataRequested);
    }

    /// P5: a request list with a duplicate `data_id` is rejected outright.
    #[test]
    fn rejects_duplicate_data_id() {
        let err = RequestList::new(vec![req(1, 0), req(2, 0), req(1, 1_000_000)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateDataRequested(1)));
    }

    #[test]
    fn rejects_too_much_data_requested() {
        let requests: Vec<_> = (0..=MAX_DATA_REQ as u32).map(|id| req(id, 0)).collect();
        let err = RequestList::new(requests).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::TooMuchDataRequested
        );
    }

    #[test]
    fn accepts_distinct_ids_up_to_the_limit() {
        let requests: Vec<_> = (0..MAX_DATA_REQ as u32).map(|id| req(id, 0)).collect();
        let list = RequestList::new(requests).unwrap();
        assert_eq!(list.len(), MAX_DATA_REQ);
    }

    #[test]
    fn partition_by_splits_on_predicate() {
        let list = RequestList::new(vec![req(1, 0), req(2, 0), req(3, 0)]).unwrap();
        let evens = list.partition_by(|id| id % 2 == 0);
        assert_eq!(evens, vec![req(2, 0)]);
    }

    #[test]
    fn fixed_width_matches_declared_scalar_sizes() {
        assert_eq!(Type::U64.fixed_width(), Some(8));
        assert_eq!(Type::Float.fixed_width(), Some(4));
        assert_eq!(Type::Bytes.fixed_width(), None);
    }
}
