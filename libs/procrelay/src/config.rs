// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::os::fd::RawFd;

/// Default upper bound on one host frame (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Default per-stream accumulator size.
pub const DEFAULT_STREAM_BUFFER_BYTES: usize = 16384;

/// Runtime settings for one relay process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Descriptor spawn requests are read from.
    pub input_fd: RawFd,
    /// Descriptor replies and child output are written to.
    pub output_fd: RawFd,
    /// Largest frame accepted or produced on the host channel.
    pub max_frame_bytes: usize,
    /// Bytes a child stream may buffer before it is relayed without a newline.
    pub stream_buffer_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input_fd: 0,
            output_fd: 1,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            stream_buffer_bytes: DEFAULT_STREAM_BUFFER_BYTES,
        }
    }
}
