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

//! `nop` -- registers, accepts subscriptions, and produces nothing. Used
//! by `spec.md` §8 scenario 1 to confirm that an idle driver never fires a
//! callback and never errors.

use std::os::fd::RawFd;

use async_trait::async_trait;

use hound_api::driver::{
    DriverConfig, DriverCtx, DriverFactory, DriverMode, DriverOps,
};
use hound_api::types::{DataFormat, Record, RequestList, SchemaDescriptor, Type, Unit};
use hound_api::Error;

use super::selfpipe::SelfPipe;

pub const DATA_ID: u32 = 1;

pub struct NopFactory;

impl DriverFactory for NopFactory {
    fn name(&self) -> &'static str {
        "nop"
    }

    fn schema(&self) -> Vec<SchemaDescriptor> {
        vec![SchemaDescriptor {
            data_id: DATA_ID,
            name: String::from("nop"),
            formats: vec![DataFormat {
                name: String::from("value"),
                unit: Unit::None,
                offset: 0,
                length: 0,
                ty: Type::Bytes,
            }],
        }]
    }

    fn create(
        &self,
        _ctx: DriverCtx,
        _args: &[String],
        _cfg: &DriverConfig,
    ) -> Result<Box<dyn DriverOps>, Error> {
        Ok(Box::new(NopDriver { pipe: None }))
    }
}

struct NopDriver {
    pipe: Option<SelfPipe>,
}

#[async_trait]
impl DriverOps for NopDriver {
    fn device_name(&self) -> String {
        String::from("nop")
    }

    fn mode(&self) -> DriverMode {
        DriverMode::Push
    }

    async fn datadesc(
        &mut self,
        descs: &mut [hound_api::types::DriverDescriptor],
    ) -> Result<(), Error> {
        for desc in descs {
            desc.enabled = true;
            desc.advertised_periods = vec![0, 1_000_000_000];
        }

        Ok(())
    }

    async fn setdata(&mut self, _reqs: &RequestList) -> Result<(), Error> {
        Ok(())
    }

    async fn start(&mut self) -> Result<RawFd, Error> {
        let pipe = SelfPipe::new()?;
        let fd = pipe.read_fd();
        self.pipe = Some(pipe);
        Ok(fd)
    }

    async fn stop(&mut self) -> Result<(), Error> {
        if let Some(mut pipe) = self.pipe.take() {
            pipe.close();
        }

        Ok(())
    }

    async fn parse(&mut self, _buf: &[u8]) -> Result<(usize, Vec<Record>), Error> {
        Ok((0, Vec::new()))
    }
}
