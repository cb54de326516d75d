// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Ordered collection of live children, kept in step with the poll set.

use crate::host::Relay;
use crate::poll_set::PollSet;
use crate::process::{Drained, ProcessRecord};
use crate::status::Status;
use crate::sys::Pid;

/// What retiring a record produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub status: Status,
}

/// Live children in spawn order.
///
/// Record `i` owns poll slots `reserved + 2i` and `reserved + 2i + 1`.
#[derive(Debug, Default)]
pub struct ProcessTable {
    records: Vec<ProcessRecord>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ProcessRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProcessRecord> {
        self.records.get(index)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.records.iter().map(ProcessRecord::pid).collect()
    }

    /// Drain pending events of every record in order while budget remains.
    ///
    /// Records whose streams have both closed are retired in place; the
    /// record that slides into the vacated index is checked next.
    pub fn drain<R: Relay + ?Sized>(
        &mut self,
        budget: &mut usize,
        poll: &mut PollSet,
        relay: &mut R,
    ) -> Result<Vec<Reaped>, Status> {
        let mut reaped = Vec::new();
        let mut index = 0;
        while index < self.records.len() && *budget > 0 {
            match self.records[index].check(budget, poll, relay)? {
                Drained::Open => index += 1,
                Drained::Hangup => reaped.push(self.retire(index, budget, poll, relay)?),
            }
        }
        Ok(reaped)
    }

    /// Flush, close and reap the record at `index`, release its poll slots
    /// and move every later record down by one.
    pub fn retire<R: Relay + ?Sized>(
        &mut self,
        index: usize,
        budget: &mut usize,
        poll: &mut PollSet,
        relay: &mut R,
    ) -> Result<Reaped, Status> {
        let record = &mut self.records[index];
        record.flush(budget, poll, relay)?;
        record.close();
        poll.remove_pair(record.slots().0);

        let mut record = self.records.remove(index);
        for later in &mut self.records[index..] {
            later.shift_down();
        }
        let status = record.reap();
        tracing::debug!("[ProcessTable] retired {} ({})", record.pid(), status);
        Ok(Reaped {
            pid: record.pid(),
            status,
        })
    }

    /// Whether every record owns the pair of slots its position implies.
    pub fn is_consistent_with(&self, poll: &PollSet) -> bool {
        poll.child_slots() == 2 * self.records.len()
            && self.records.iter().enumerate().all(|(i, record)| {
                let first = poll.reserved() + 2 * i;
                record.slots() == (first, first + 1)
            })
    }
}
