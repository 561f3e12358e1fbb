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

//! `counter` -- a push-mode driver that emits a monotonically increasing
//! `u64` at a fixed period, entirely timer-driven. Used by `spec.md` §8
//! scenarios 3 (periodic production) and 4 (slow consumer / drop-oldest).
//!
//! It owns no real device; `poll`'s `timeout` output is the only thing
//! that drives production, so its watched fd is a self-pipe that is never
//! written to -- readability never fires, only the per-cycle timeout does.

use std::os::fd::RawFd;
use std::time::Duration;

use async_trait::async_trait;

use hound_api::driver::{
    DriverConfig, DriverCtx, DriverFactory, DriverMode, DriverOps, IoStyle, PollEvents,
    PollOutcome,
};
use hound_api::types::{DataFormat, DriverDescriptor, RequestList, SchemaDescriptor, Type, Unit};
use hound_api::Error;

use super::selfpipe::SelfPipe;

pub const DATA_ID: u32 = 1;
pub const PERIOD_NS: u64 = 1_000_000; // 1 kHz

pub struct CounterFactory;

impl DriverFactory for CounterFactory {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn schema(&self) -> Vec<SchemaDescriptor> {
        vec![SchemaDescriptor {
            data_id: DATA_ID,
            name: String::from("counter"),
            formats: vec![DataFormat {
                name: String::from("count"),
                unit: Unit::None,
                offset: 0,
                length: 8,
                ty: Type::U64,
            }],
        }]
    }

    fn create(
        &self,
        ctx: DriverCtx,
        _args: &[String],
        _cfg: &DriverConfig,
    ) -> Result<Box<dyn DriverOps>, Error> {
        Ok(Box::new(CounterDriver {
            ctx,
            pipe: None,
            count: 0,
            period_ns: PERIOD_NS,
        }))
    }
}

struct CounterDriver {
    ctx: DriverCtx,
    pipe: Option<SelfPipe>,
    count: u64,
    period_ns: u64,
}

#[async_trait]
impl DriverOps for CounterDriver {
    fn device_name(&self) -> String {
        String::from("counter")
    }

    fn mode(&self) -> DriverMode {
        DriverMode::Push
    }

    fn io_style(&self) -> IoStyle {
        IoStyle::Poll
    }

    async fn datadesc(&mut self, descs: &mut [DriverDescriptor]) -> Result<(), Error> {
        for desc in descs {
            desc.enabled = true;
            desc.advertised_periods = vec![self.period_ns];
        }

        Ok(())
    }

    async fn setdata(&mut self, reqs: &RequestList) -> Result<(), Error> {
        if let Some(req) = reqs.iter().find(|r| r.data_id == DATA_ID) {
            self.period_ns = req.period_ns;
        }

        Ok(())
    }

    async fn start(&mut self) -> Result<RawFd, Error> {
        let pipe = SelfPipe::new()?;
        let fd = pipe.read_fd();
        self.pipe = Some(pipe);
        self.count = 0;
        Ok(fd)
    }

    async fn stop(&mut self) -> Result<(), Error> {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }

        Ok(())
    }

    async fn poll(&mut self, revents: PollEvents) -> Result<PollOutcome, Error> {
        if revents.readable {
            if let Some(pipe) = &self.pipe {
                pipe.drain();
            }
        }

        let mut payload = self.ctx.alloc_payload(8);
        payload.copy_from_slice(&self.count.to_le_bytes());
        self.count += 1;

        let record = self.ctx.make_record(0, DATA_ID, payload);

        Ok(PollOutcome {
            next_events: None,
            records: vec![record],
            timeout: Some(Duration::from_nanos(self.period_ns.max(1))),
        })
    }
}
