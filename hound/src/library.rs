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

//! The top-level library handle.
//!
//! `spec.md` §9's Design Notes call the driver registry and driver-instance
//! table "process-wide... wrap them in a library handle that the public API
//! creates lazily on first call and tears down on full destroy." [`Hound`]
//! is that handle: it owns the one background engine task and hands out
//! cheap clones of its [`EngineHandle`] to every [`Context`].

use std::sync::Arc;

use hound_api::driver::{DriverConfig, DriverFactory};
use hound_api::types::{DataId, DeviceId, RequestList};
use hound_api::Error;

use crate::context::Context;
use crate::engine::{self, DatadescEntry, EngineHandle};

/// An entry from [`Hound::get_datadesc`].
pub type DataDescriptor = DatadescEntry;

/// The process-wide Hound handle. Cloning is cheap (it's a handle to the
/// shared background engine); most embedding applications construct one
/// at startup and keep it for the process lifetime.
#[derive(Clone)]
pub struct Hound {
    engine: EngineHandle,
}

impl Hound {
    /// Spawns the background engine task and returns a handle to it. The
    /// registry starts out empty; call [`Hound::register_driver`] for each
    /// driver factory before the first [`Hound::init_driver`].
    pub fn new() -> Hound {
        Hound {
            engine: engine::spawn_engine(),
        }
    }

    /// Registers a driver factory under its own name. One-shot: a second
    /// registration under the same name fails with
    /// [`Error::DriverAlreadyRegistered`]. Per `spec.md` §4.4, all
    /// registrations should happen before the first `init_driver` call.
    pub async fn register_driver(&self, factory: Arc<dyn DriverFactory>) -> Result<(), Error> {
        self.engine.register_factory(factory).await
    }

    /// Allocates a new driver instance of `name` at `path`, passing
    /// `args`/`cfg` through to [`DriverFactory::create`]. Fails with
    /// [`Error::DriverAlreadyPresent`] if `path` is occupied, or
    /// [`Error::ConflictingDrivers`] if any of the driver's data ids are
    /// already claimed by another instance.
    pub async fn init_driver(
        &self,
        name: &str,
        path: &str,
        args: Vec<String>,
        cfg: DriverConfig,
    ) -> Result<Arc<str>, Error> {
        self.engine.init_driver(name, path, args, cfg).await
    }

    /// Tears down the driver instance at `path`. Fails with
    /// [`Error::DriverInUse`] while any context still subscribes to one of
    /// its data ids.
    pub async fn destroy_driver(&self, path: &str) -> Result<(), Error> {
        self.engine.destroy_driver(path).await
    }

    /// Returns the flattened descriptor table across every live driver
    /// instance.
    pub async fn get_datadesc(&self) -> Result<Vec<DataDescriptor>, Error> {
        self.engine.get_datadesc().await
    }

    pub async fn get_device_name(&self, dev_id: DeviceId) -> Result<String, Error> {
        self.engine.get_device_name(dev_id).await
    }

    /// Allocates a [`Context`] for `requests`, with a queue of
    /// `queue_capacity`. See `spec.md` §4.7 for the validation and
    /// rollback rules this enforces.
    pub async fn alloc_ctx(
        &self,
        requests: RequestList,
        queue_capacity: usize,
    ) -> Result<Context, Error> {
        Context::alloc(&self.engine, requests, queue_capacity).await
    }

    /// Convenience constructor for a single-request context, matching the
    /// common case in `spec.md` §8's scenarios.
    pub async fn alloc_ctx_single(
        &self,
        data_id: DataId,
        period_ns: u64,
        queue_capacity: usize,
    ) -> Result<Context, Error> {
        let requests = RequestList::new(vec![hound_api::types::DataRequest {
            data_id,
            period_ns,
        }])?;

        self.alloc_ctx(requests, queue_capacity).await
    }
}

impl Default for Hound {
    fn default() -> Self {
        Hound::new()
    }
}
