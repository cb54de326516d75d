// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The `{pid, OsPid}` announcement written to a child's first endpoint.
//!
//! Encoded in Erlang external term format so the controller on the other end
//! of the socket can `binary_to_term` it directly. Stream transports prepend a
//! 4-byte big-endian length. Encoding happens in the forked child, so it
//! writes into a fixed stack buffer and never allocates.

const VERSION: u8 = 131;
const SMALL_TUPLE_EXT: u8 = 104;
const ATOM_EXT: u8 = 100;
const SMALL_INTEGER_EXT: u8 = 97;
const INTEGER_EXT: u8 = 98;
const SMALL_BIG_EXT: u8 = 110;

/// Largest value encoded as `INTEGER_EXT`.
const INTEGER_EXT_MAX: u64 = (1 << 27) - 1;

const TAG: &[u8] = b"pid";

/// Upper bound on the encoded size: header, version, tuple, atom, big integer.
pub const MAX_LEN: usize = 4 + 1 + 2 + 3 + TAG.len() + 3 + 8;

/// Encoded pid announcement.
pub struct PidMessage {
    buf: [u8; MAX_LEN],
    len: usize,
}

impl PidMessage {
    pub fn encode(pid: u64, length_header: bool) -> Self {
        let mut msg = Self {
            buf: [0; MAX_LEN],
            len: if length_header { 4 } else { 0 },
        };
        msg.push(VERSION);
        msg.push(SMALL_TUPLE_EXT);
        msg.push(2);
        msg.push(ATOM_EXT);
        msg.extend(&(TAG.len() as u16).to_be_bytes());
        msg.extend(TAG);
        msg.push_ulong(pid);

        if length_header {
            let body = (msg.len - 4) as u32;
            msg.buf[..4].copy_from_slice(&body.to_be_bytes());
        }
        msg
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn push(&mut self, byte: u8) {
        self.buf[self.len] = byte;
        self.len += 1;
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    fn push_ulong(&mut self, value: u64) {
        if value < 256 {
            self.push(SMALL_INTEGER_EXT);
            self.push(value as u8);
        } else if value <= INTEGER_EXT_MAX {
            self.push(INTEGER_EXT);
            self.extend(&(value as u32).to_be_bytes());
        } else {
            let digits = value.to_le_bytes();
            let n = digits.iter().rposition(|&d| d != 0).map_or(1, |i| i + 1);
            self.push(SMALL_BIG_EXT);
            self.push(n as u8);
            self.push(0);
            self.extend(&digits[..n]);
        }
    }
}
