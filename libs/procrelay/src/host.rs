// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Boundary with the upstream controller.
//!
//! The event loop only sees the [`HostChannel`] trait. [`FramedHost`] is the
//! concrete channel the binary uses: length-prefixed MessagePack frames over
//! an input and an output descriptor.
//!
//! ```text
//! ┌──────────────┬───────────────────────────────┐
//! │ u32 BE: len  │ MessagePack body (len bytes)  │
//! └──────────────┴───────────────────────────────┘
//! ```

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::poll_set::{PollSet, READ_INTEREST};
use crate::process::StreamKind;
use crate::request::SpawnRequest;
use crate::status::Status;
use crate::sys::{self, Pid};

/// Size of the frame length prefix.
pub const HEADER_LEN: usize = 4;

/// Upper bound on an encoded `Output` body beyond its data bytes.
pub const OUTPUT_OVERHEAD: usize = 64;

const READ_CHUNK: usize = 64 * 1024;

/// Sends child output upstream.
pub trait Relay {
    fn relay(&mut self, pid: Pid, stream: StreamKind, data: &[u8]) -> Result<(), Status>;
}

/// What one blocking wait produced.
#[derive(Debug)]
pub enum Wake {
    /// `events` child slots are ready; `requests` arrived from upstream and
    /// must each get a reply. A request that could not be decoded is already
    /// an `Err`.
    Ready {
        events: usize,
        requests: Vec<Result<SpawnRequest, Status>>,
    },
    /// Upstream closed the channel cleanly.
    Closed,
}

/// The upstream side of the relay.
pub trait HostChannel: Relay {
    /// Slots the channel needs at the front of the poll set.
    fn reserved_slots(&self) -> Vec<(RawFd, libc::c_short)>;

    /// Announce readiness before the first wait.
    fn handshake(&mut self) -> Result<(), Status>;

    /// Block until the host or any child has events. Consumes the reserved
    /// slots' events before returning.
    fn wait(&mut self, poll: &mut PollSet) -> Result<Wake, Status>;

    /// Answer one spawn request.
    fn reply(&mut self, result: Result<Pid, Status>) -> Result<(), Status>;
}

/// Messages from the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inbound {
    Spawn(SpawnRequest),
}

/// Messages to the controller.
///
/// `D` is the output payload: owned when decoding, borrowed when relaying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "D: serde_bytes::Serialize",
    deserialize = "D: serde_bytes::Deserialize<'de>"
))]
pub enum Outbound<D = Vec<u8>> {
    Ready {
        version: String,
    },
    Spawned {
        pid: Pid,
    },
    SpawnFailed {
        status: i32,
        name: String,
    },
    Output {
        pid: Pid,
        stream: StreamKind,
        #[serde(with = "serde_bytes")]
        data: D,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("inbound frame of {len} bytes exceeds limit of {max}")]
    InboundTooLarge { len: usize, max: usize },

    #[error("outbound frame of {len} bytes exceeds limit of {max}")]
    OutboundTooLarge { len: usize, max: usize },

    #[error("input closed with {0} bytes of an incomplete frame")]
    Truncated(usize),

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

impl From<FrameError> for Status {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::InboundTooLarge { .. } => Status::READ_OVERFLOW,
            FrameError::OutboundTooLarge { .. } => Status::WRITE_OVERFLOW,
            FrameError::Truncated(_) => Status::READ_NULL,
            FrameError::Encode(_) => Status::ENCODE_ERROR,
            FrameError::Decode(_) => Status::INVALID_INPUT,
        }
    }
}

/// Serialize `message` into a complete frame.
pub fn encode_frame<D: serde_bytes::Serialize>(
    message: &Outbound<D>,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let body = rmp_serde::to_vec_named(message)?;
    if body.len() > max_frame_bytes || body.len() > u32::MAX as usize {
        return Err(FrameError::OutboundTooLarge {
            len: body.len(),
            max: max_frame_bytes,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode_inbound(body: &[u8]) -> Result<Inbound, FrameError> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Reassembles frames from arbitrary read boundaries.
#[derive(Debug)]
pub struct FrameReader {
    pending: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameReader {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_frame_bytes,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Whether part of a frame is buffered.
    pub fn is_mid_frame(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next complete frame body, if one is buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header) = self.pending.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*header) as usize;
        if len > self.max_frame_bytes {
            return Err(FrameError::InboundTooLarge {
                len,
                max: self.max_frame_bytes,
            });
        }
        if self.pending.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let body = self.pending[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.pending.drain(..HEADER_LEN + len);
        Ok(Some(body))
    }
}

/// Host channel over a pair of descriptors.
///
/// Reserved poll slots: `0` is the input (readable interest), `1` is the
/// output (no interest, so only error or hang-up is ever reported).
pub struct FramedHost {
    input: OwnedFd,
    output: OwnedFd,
    reader: FrameReader,
    scratch: Vec<u8>,
    max_frame_bytes: usize,
}

impl FramedHost {
    pub const INPUT_SLOT: usize = 0;
    pub const OUTPUT_SLOT: usize = 1;

    pub fn new(input: OwnedFd, output: OwnedFd, max_frame_bytes: usize) -> Self {
        Self {
            input,
            output,
            reader: FrameReader::new(max_frame_bytes),
            scratch: vec![0; READ_CHUNK],
            max_frame_bytes,
        }
    }

    fn send<D: serde_bytes::Serialize>(&mut self, message: &Outbound<D>) -> Result<(), Status> {
        let frame = encode_frame(message, self.max_frame_bytes)?;
        sys::write_all(self.output.as_raw_fd(), &frame)
    }

    /// One read from the input. `Ok(false)` at end-of-file.
    fn fill(&mut self) -> Result<bool, Status> {
        let n = sys::read(&self.input, &mut self.scratch)?;
        if n == 0 {
            return Ok(false);
        }
        self.reader.extend(&self.scratch[..n]);
        Ok(true)
    }

    fn drain_requests(&mut self) -> Result<Vec<Result<SpawnRequest, Status>>, Status> {
        let mut requests = Vec::new();
        while let Some(body) = self.reader.next_frame()? {
            requests.push(match decode_inbound(&body) {
                Ok(Inbound::Spawn(request)) => Ok(request),
                Err(err) => {
                    tracing::warn!("[FramedHost] dropping undecodable frame: {}", err);
                    Err(Status::from(err))
                }
            });
        }
        Ok(requests)
    }
}

fn check_slot(revents: libc::c_short) -> Result<(), Status> {
    if revents & libc::POLLNVAL != 0 {
        return Err(Status::POLL_NVAL);
    }
    if revents & libc::POLLERR != 0 {
        return Err(Status::POLL_ERR);
    }
    Ok(())
}

impl Relay for FramedHost {
    fn relay(&mut self, pid: Pid, stream: StreamKind, data: &[u8]) -> Result<(), Status> {
        self.send(&Outbound::Output { pid, stream, data })
    }
}

impl HostChannel for FramedHost {
    fn reserved_slots(&self) -> Vec<(RawFd, libc::c_short)> {
        vec![(self.input.as_raw_fd(), READ_INTEREST), (self.output.as_raw_fd(), 0)]
    }

    fn handshake(&mut self) -> Result<(), Status> {
        let ready: Outbound = Outbound::Ready {
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        self.send(&ready)
    }

    fn wait(&mut self, poll: &mut PollSet) -> Result<Wake, Status> {
        let ready = loop {
            match poll.wait(-1) {
                Err(Status::POLL_EINTR) => continue,
                other => break other?,
            }
        };
        let mut events = ready;

        let output = poll.revents(Self::OUTPUT_SLOT);
        if output != 0 {
            check_slot(output)?;
            return Err(Status::POLL_HUP);
        }

        let input = poll.revents(Self::INPUT_SLOT);
        let mut requests = Vec::new();
        if input != 0 {
            events -= 1;
            check_slot(input)?;
            if !self.fill()? {
                if self.reader.is_mid_frame() {
                    return Err(FrameError::Truncated(self.reader.pending_len()).into());
                }
                tracing::info!("[FramedHost] input closed");
                return Ok(Wake::Closed);
            }
            requests = self.drain_requests()?;
        }
        Ok(Wake::Ready { events, requests })
    }

    fn reply(&mut self, result: Result<Pid, Status>) -> Result<(), Status> {
        let message: Outbound = match result {
            Ok(pid) => Outbound::Spawned { pid },
            Err(status) => Outbound::SpawnFailed {
                status: status.code(),
                name: status.to_string(),
            },
        };
        self.send(&message)
    }
}
