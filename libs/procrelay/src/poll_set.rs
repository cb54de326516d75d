// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The single poll-descriptor array shared by the host channel and every
//! live child.
//!
//! ```text
//!  0 .. reserved            reserved + 2k    reserved + 2k + 1
//! ┌────────────────────┬───────────────────┬───────────────────┬──
//! │ host channel slots │ record k: stdout  │ record k: stderr  │ ...
//! └────────────────────┴───────────────────┴───────────────────┴──
//! ```
//!
//! Records hold indices into this arena. The child slots are always one
//! contiguous block after the reserved slots; [`PollSet::remove_pair`] shifts
//! everything after the removed pair down by two, and the owning table
//! adjusts the indices of the records that moved.

use std::os::fd::RawFd;

use crate::status::{self, Family, Status};

/// Readable or priority data.
pub const READ_INTEREST: libc::c_short = libc::POLLIN | libc::POLLPRI;

/// Poll-descriptor arena.
#[derive(Default)]
pub struct PollSet {
    slots: Vec<libc::pollfd>,
    reserved: usize,
}

impl PollSet {
    /// Arena whose first slots belong to the host channel.
    pub fn with_reserved(reserved: &[(RawFd, libc::c_short)]) -> Self {
        let slots = reserved
            .iter()
            .map(|&(fd, events)| libc::pollfd {
                fd,
                events,
                revents: 0,
            })
            .collect();
        Self {
            slots,
            reserved: reserved.len(),
        }
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots owned by child streams.
    pub fn child_slots(&self) -> usize {
        self.slots.len() - self.reserved
    }

    /// Register a child's two pipe read ends. Returns `(stdout, stderr)` slot
    /// indices, which are always adjacent.
    pub fn push_pair(&mut self, stdout: RawFd, stderr: RawFd) -> (usize, usize) {
        let index = self.slots.len();
        for fd in [stdout, stderr] {
            self.slots.push(libc::pollfd {
                fd,
                events: READ_INTEREST,
                revents: 0,
            });
        }
        (index, index + 1)
    }

    /// Drop the pair starting at `first` and move every later slot down by two.
    pub fn remove_pair(&mut self, first: usize) {
        assert!(
            first >= self.reserved && first + 1 < self.slots.len(),
            "slot pair {first} is not a child pair"
        );
        self.slots.drain(first..first + 2);
    }

    /// Events reported for `index` by the last wait.
    pub fn revents(&self, index: usize) -> libc::c_short {
        self.slots[index].revents
    }

    pub fn events(&self, index: usize) -> libc::c_short {
        self.slots[index].events
    }

    /// Descriptor registered at `index`, including slots that were disabled.
    pub fn fd(&self, index: usize) -> RawFd {
        let fd = self.slots[index].fd;
        if fd < 0 { !fd } else { fd }
    }

    /// Stop polling `index` without removing it.
    ///
    /// poll(2) skips negative descriptors, so the slot keeps `!fd` to stay
    /// recoverable through [`PollSet::fd`].
    pub fn disable(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if slot.fd >= 0 {
            slot.fd = !slot.fd;
        }
        slot.events = 0;
        slot.revents = 0;
    }

    pub fn is_disabled(&self, index: usize) -> bool {
        self.slots[index].fd < 0
    }

    /// Every descriptor the arena tracks, enabled or not.
    pub fn tracked_fds(&self) -> Vec<RawFd> {
        (0..self.slots.len()).map(|i| self.fd(i)).collect()
    }

    /// Block in poll(2) over the whole arena. `timeout_ms < 0` waits forever.
    ///
    /// Returns the number of slots with non-zero `revents`.
    pub fn wait(&mut self, timeout_ms: libc::c_int) -> Result<usize, Status> {
        for slot in &mut self.slots {
            slot.revents = 0;
        }
        // SAFETY: the pointer/length pair describes our own slot vector.
        let ready = unsafe {
            libc::poll(
                self.slots.as_mut_ptr(),
                self.slots.len() as libc::nfds_t,
                timeout_ms,
            )
        };
        if ready < 0 {
            return Err(status::last_os_error(Family::Poll));
        }
        Ok(ready as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use crate::sys::{self, Pipe};
    use std::os::fd::AsRawFd;

    #[test]
    fn test_pairs_follow_reserved_slots() {
        let mut set = PollSet::with_reserved(&[(0, READ_INTEREST), (1, 0)]);
        assert_eq!(set.push_pair(10, 11), (2, 3));
        assert_eq!(set.push_pair(12, 13), (4, 5));
        assert_eq!(set.child_slots(), 4);
        assert_eq!(set.events(4), READ_INTEREST);
        assert_eq!(set.events(5), READ_INTEREST);
    }

    #[test]
    fn test_remove_pair_shifts_later_slots_down() {
        let mut set = PollSet::with_reserved(&[(0, READ_INTEREST)]);
        set.push_pair(10, 11);
        set.push_pair(12, 13);
        set.push_pair(14, 15);

        set.remove_pair(3);

        assert_eq!(set.len(), 5);
        assert_eq!(set.tracked_fds(), vec![0, 10, 11, 14, 15]);
    }

    #[test]
    #[should_panic(expected = "is not a child pair")]
    fn test_remove_reserved_slot_panics() {
        let mut set = PollSet::with_reserved(&[(0, READ_INTEREST), (1, 0)]);
        set.push_pair(10, 11);
        set.remove_pair(0);
    }

    #[test]
    fn test_disabled_slot_keeps_descriptor() {
        let mut set = PollSet::default();
        set.push_pair(7, 8);
        set.disable(0);
        set.disable(0);
        assert!(set.is_disabled(0));
        assert_eq!(set.fd(0), 7);
        assert_eq!(set.events(0), 0);
        assert_eq!(set.tracked_fds(), vec![7, 8]);
    }

    #[test]
    #[serial]
    fn test_wait_reports_readable_pipe() {
        let pipe = Pipe::new().unwrap();
        let idle = Pipe::new().unwrap();
        let mut set = PollSet::default();
        set.push_pair(pipe.read.as_raw_fd(), idle.read.as_raw_fd());

        assert_eq!(set.wait(0).unwrap(), 0);

        sys::write_all(pipe.write.as_raw_fd(), b"x").unwrap();
        assert_eq!(set.wait(1000).unwrap(), 1);
        assert_ne!(set.revents(0) & libc::POLLIN, 0);
        assert_eq!(set.revents(1), 0);
    }

    #[test]
    #[serial]
    fn test_wait_skips_disabled_slots() {
        let Pipe { read: reader, write } = Pipe::new().unwrap();
        let other = Pipe::new().unwrap();
        drop(write);
        let mut set = PollSet::default();
        set.push_pair(reader.as_raw_fd(), other.read.as_raw_fd());

        assert_eq!(set.wait(0).unwrap(), 1);
        set.disable(0);
        assert_eq!(set.wait(0).unwrap(), 0);
    }
}
