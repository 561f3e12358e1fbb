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

//! `file` -- a pull-mode driver that hands back one fixed-size chunk of a
//! backing file per `next()` trigger. Used by `spec.md` §8 scenario 2.
//!
//! `next()` cannot itself hand a record to the engine -- only `parse`/
//! `poll` do that -- so it records how many chunks are owed and wakes a
//! self-pipe; the next `poll` cycle drains the owed count into records.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use hound_api::driver::{
    DriverConfig, DriverCtx, DriverFactory, DriverMode, DriverOps, IoStyle, PollEvents,
    PollOutcome,
};
use hound_api::types::{DataFormat, DriverDescriptor, RequestList, SchemaDescriptor, Type, Unit};
use hound_api::Error;

use super::selfpipe::SelfPipe;

pub const DATA_ID: u32 = 1;
pub const CHUNK_LEN: usize = 64;

pub struct FileFactory;

impl DriverFactory for FileFactory {
    fn name(&self) -> &'static str {
        "file"
    }

    fn schema(&self) -> Vec<SchemaDescriptor> {
        vec![SchemaDescriptor {
            data_id: DATA_ID,
            name: String::from("file"),
            formats: vec![DataFormat {
                name: String::from("chunk"),
                unit: Unit::None,
                offset: 0,
                length: 0,
                ty: Type::Bytes,
            }],
        }]
    }

    fn create(
        &self,
        ctx: DriverCtx,
        args: &[String],
        _cfg: &DriverConfig,
    ) -> Result<Box<dyn DriverOps>, Error> {
        let path = args
            .first()
            .ok_or_else(|| Error::InvalidValue(String::from("file driver requires a path argument")))?
            .clone();

        let contents =
            std::fs::read(&path).map_err(|e| Error::Io(format!("{}: {}", path, e)))?;

        Ok(Box::new(FileDriver {
            ctx,
            pipe: None,
            contents,
            cursor: Mutex::new(0),
            pending: AtomicUsize::new(0),
        }))
    }
}

struct FileDriver {
    ctx: DriverCtx,
    pipe: Option<SelfPipe>,
    contents: Vec<u8>,
    cursor: Mutex<usize>,
    pending: AtomicUsize,
}

#[async_trait]
impl DriverOps for FileDriver {
    fn device_name(&self) -> String {
        String::from("file")
    }

    fn mode(&self) -> DriverMode {
        DriverMode::Pull
    }

    fn io_style(&self) -> IoStyle {
        IoStyle::Poll
    }

    async fn datadesc(&mut self, descs: &mut [DriverDescriptor]) -> Result<(), Error> {
        for desc in descs {
            desc.enabled = true;
            desc.advertised_periods = vec![0];
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

    async fn next(&mut self, data_id: u32, n: u32) -> Result<(), Error> {
        if data_id != DATA_ID {
            return Ok(());
        }

        self.pending.fetch_add(n as usize, Ordering::SeqCst);

        if let Some(pipe) = &self.pipe {
            pipe.wake();
        }

        Ok(())
    }

    async fn poll(&mut self, revents: PollEvents) -> Result<PollOutcome, Error> {
        if revents.readable {
            if let Some(pipe) = &self.pipe {
                pipe.drain();
            }
        }

        let mut records = Vec::new();
        let owed = self.pending.swap(0, Ordering::SeqCst);

        for _ in 0..owed {
            let mut cursor = self.cursor.lock().unwrap();

            if *cursor >= self.contents.len() {
                break;
            }

            let end = (*cursor + CHUNK_LEN).min(self.contents.len());
            let chunk = &self.contents[*cursor..end];
            let mut payload = self.ctx.alloc_payload(chunk.len());
            payload.copy_from_slice(chunk);
            *cursor = end;
            drop(cursor);

            records.push(self.ctx.make_record(0, DATA_ID, payload));
        }

        Ok(PollOutcome::with_records(records))
    }
}
