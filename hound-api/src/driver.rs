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

//! Defines the "ops vtable" contract (`spec.md` §4.4) that every Hound
//! driver implements, plus the small set of types the engine uses to talk
//! to a driver instance.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Error;
use crate::types::{
    DataId, DeviceId, DriverDescriptor, Record, RequestList, SeqNo,
};

/// How driver-instance configuration is given to [`DriverFactory::create`].
/// Each driver interprets its own keys; by convention a driver should
/// validate them and return [`Error::InvalidValue`] on a bad or missing
/// parameter.
pub type DriverConfig = toml::value::Table;

/// Whether a driver instance is currently producing on its own schedule
/// (`Push`) or only in response to [`DriverOps::next`] (`Pull`). Per
/// `spec.md` §4.4, an instance is `Pull` if *any* active subscription has
/// `period_ns == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    Push,
    Pull,
}

/// Which half of the push/pull pair (`spec.md` §4.4) a driver implements.
/// A driver is "exactly one of poll or parse"; the engine has to know
/// which before it ever sees a byte, so it asks up front rather than
/// probing by calling one and checking for [`Error::DriverUnsupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStyle {
    /// The engine reads raw bytes off the fd and hands them to `parse`.
    Parse,
    /// The driver owns its fd end-to-end; the engine only reports
    /// readiness via `poll`.
    Poll,
}

/// The readiness bits a poll-style driver is told about (and may ask to
/// change) on every cycle. Kept deliberately small -- this is not meant to
/// be a general `epoll`/`poll(2)` event-mask type, just the bits
/// `spec.md` §4.5 needs for poll-style drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollEvents {
    pub readable: bool,
    pub writable: bool,
}

/// What a poll-style driver's `poll` hook hands back on each invocation.
pub struct PollOutcome {
    /// If `Some`, the fd's monitored event mask changes to this for the
    /// next wait.
    pub next_events: Option<PollEvents>,
    pub records: Vec<Record>,
    /// If `Some`, arms a per-fd timeout for the next wait.
    pub timeout: Option<Duration>,
}

impl PollOutcome {
    pub fn with_records(records: Vec<Record>) -> Self {
        PollOutcome {
            next_events: None,
            records,
            timeout: None,
        }
    }
}

/// Per-instance allocator identity handed to a driver at creation time.
///
/// `spec.md` §9's Design Notes call out the original C implementation's
/// thread-local "current driver" pointer as an anti-pattern to avoid.
/// `DriverCtx` is the replacement: the engine hands each driver instance
/// one of these at creation, and the driver threads it through instead of
/// reaching for ambient, thread-local state.
#[derive(Clone)]
pub struct DriverCtx(Arc<DriverCtxInner>);

struct DriverCtxInner {
    driver_name: Arc<str>,
    path: Arc<str>,
    dev_id: DeviceId,
}

impl DriverCtx {
    pub fn new(driver_name: Arc<str>, path: Arc<str>, dev_id: DeviceId) -> Self {
        DriverCtx(Arc::new(DriverCtxInner {
            driver_name,
            path,
            dev_id,
        }))
    }

    pub fn driver_name(&self) -> &str {
        &self.0.driver_name
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    pub fn dev_id(&self) -> DeviceId {
        self.0.dev_id
    }

    /// Allocates a zeroed payload buffer. Drivers should use this (rather
    /// than a bespoke allocator) so the engine and driver agree on the
    /// allocator identity backing a [`Record`]'s payload, matching
    /// `spec.md` §5's "compatible free semantics" requirement.
    pub fn alloc_payload(&self, size: usize) -> Box<[u8]> {
        vec![0u8; size].into_boxed_slice()
    }

    /// Builds a [`Record`] stamped with this instance's device id and the
    /// current wall-clock time.
    pub fn make_record(
        &self,
        seqno: SeqNo,
        data_id: DataId,
        payload: Box<[u8]>,
    ) -> Record {
        Record {
            seqno,
            data_id,
            dev_id: self.dev_id(),
            timestamp: std::time::SystemTime::now(),
            payload,
        }
    }
}

impl fmt::Debug for DriverCtx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DriverCtx")
            .field("driver_name", &self.driver_name())
            .field("path", &self.path())
            .field("dev_id", &self.dev_id())
            .finish()
    }
}

/// The per-instance contract every Hound driver implements (`spec.md`
/// §4.4's "ops vtable"). Default method bodies stand in for the half of
/// the push/pull pair a given driver doesn't implement -- the engine only
/// ever calls the one matching [`DriverOps::mode`]; invoking the other is
/// a bug, not a recoverable error, which is why the defaults return
/// [`Error::DriverUnsupported`] rather than silently doing nothing.
#[async_trait]
pub trait DriverOps: Send {
    /// Fills in a human-readable device name. Truncated by the engine to
    /// [`crate::types::DEVICE_NAME_MAX`] bytes (including the implicit
    /// terminator) if longer.
    fn device_name(&self) -> String;

    /// Whether this instance is currently push or pull. Re-evaluated by
    /// the engine after every `setdata`.
    fn mode(&self) -> DriverMode;

    /// Which of `parse`/`poll` this driver implements. Fixed for the life
    /// of the instance; defaults to [`IoStyle::Parse`] since `spec.md`
    /// §4.4 notes the core's default helpers cover the common case.
    fn io_style(&self) -> IoStyle {
        IoStyle::Parse
    }

    /// Sets `enabled` and `advertised_periods` on each descriptor,
    /// according to what the live device actually supports.
    async fn datadesc(
        &mut self,
        descs: &mut [DriverDescriptor],
    ) -> Result<(), Error>;

    /// Commits the driver to producing exactly the aggregate active
    /// request set at these periods. May fail with
    /// [`Error::PeriodUnsupported`] or a driver-specific error.
    async fn setdata(&mut self, reqs: &RequestList) -> Result<(), Error>;

    /// Returns a non-blocking fd the engine will wait on.
    async fn start(&mut self) -> Result<RawFd, Error>;

    /// Ceases production and closes the fd returned by `start`.
    async fn stop(&mut self) -> Result<(), Error>;

    /// Releases any device-side state allocated at creation. The default
    /// no-op is appropriate for drivers with nothing to release beyond
    /// what `Drop` already handles.
    async fn destroy(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Pull-mode trigger: produce `n` samples of `data_id` on demand.
    /// No-op (and `Ok`) in push mode, matching `spec.md` §4.4.
    async fn next(&mut self, _data_id: DataId, _n: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Parses as many records as possible out of `buf`. Returns the
    /// number of *unconsumed* trailing bytes and the records produced.
    /// Only implemented by push-style, byte-stream drivers.
    async fn parse(
        &mut self,
        _buf: &[u8],
    ) -> Result<(usize, Vec<Record>), Error> {
        Err(Error::DriverUnsupported(String::from(
            "driver does not implement parse",
        )))
    }

    /// Services readiness for a poll-style driver that owns its fd
    /// end-to-end.
    async fn poll(
        &mut self,
        _revents: PollEvents,
    ) -> Result<PollOutcome, Error> {
        Err(Error::DriverUnsupported(String::from(
            "driver does not implement poll",
        )))
    }
}

/// Constructs driver instances for one driver name. Registered once,
/// process-wide, before the first `init_driver` call (`spec.md` §4.4:
/// "Registrations happen at process start, before the first init call").
pub trait DriverFactory: Send + Sync {
    /// Short, unique name this driver is registered under.
    fn name(&self) -> &'static str;

    /// The immutable schema this driver exposes. Read once at
    /// registration time and deep-copied by the engine (`spec.md` §4.3).
    fn schema(&self) -> Vec<crate::types::SchemaDescriptor>;

    /// Allocates device-side state for a new instance at `ctx.path()`,
    /// given the arguments and configuration table a caller supplied to
    /// `init_driver`.
    fn create(
        &self,
        ctx: DriverCtx,
        args: &[String],
        cfg: &DriverConfig,
    ) -> Result<Box<dyn DriverOps>, Error>;
}
