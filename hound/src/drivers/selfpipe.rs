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

//! A minimal self-pipe: a private fd pair a driver can hand the engine as
//! its "watch this for readiness" fd even when the driver has no real
//! device fd of its own (a timer-driven counter, an on-demand file
//! reader). Writing a byte makes the read end readable; draining it
//! clears readiness again.

use std::os::fd::{IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{close, pipe, write};

use hound_api::Error;

pub struct SelfPipe {
    read_fd: RawFd,
    write_fd: OwnedFd,
}

impl SelfPipe {
    pub fn new() -> Result<SelfPipe, Error> {
        let (read_end, write_end) =
            pipe().map_err(|e| Error::Io(format!("pipe: {}", e)))?;

        let read_fd = read_end.into_raw_fd();

        set_nonblocking(read_fd)?;

        Ok(SelfPipe {
            read_fd,
            write_fd: write_end,
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Wakes the engine's wait on `read_fd` by writing one byte.
    pub fn wake(&self) {
        let _ = write(&self.write_fd, &[1u8]);
    }

    /// Drains whatever is currently buffered, resetting readability.
    pub fn drain(&self) {
        let mut scratch = [0u8; 256];

        loop {
            match nix::unistd::read(self.read_fd, &mut scratch) {
                Ok(0) => break,
                Ok(n) if n < scratch.len() => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
    }

    pub fn close(&mut self) {
        let _ = close(self.read_fd);
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| Error::Io(e.to_string()))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;

    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| Error::Io(e.to_string()))?;
    Ok(())
}
