// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Single-threaded loop: wait on the host and every child, answer spawn
//! requests, relay child output and retire children whose streams closed.

use crate::config::RelayConfig;
use crate::host::{HostChannel, Wake};
use crate::poll_set::PollSet;
use crate::spawner;
use crate::status::Status;
use crate::table::ProcessTable;

pub struct EventLoop<H: HostChannel> {
    host: H,
    poll: PollSet,
    table: ProcessTable,
    config: RelayConfig,
}

impl<H: HostChannel> EventLoop<H> {
    pub fn new(host: H, config: RelayConfig) -> Self {
        let poll = PollSet::with_reserved(&host.reserved_slots());
        Self {
            host,
            poll,
            table: ProcessTable::new(),
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn poll(&self) -> &PollSet {
        &self.poll
    }

    /// Run until the host closes the channel or a fatal status occurs.
    ///
    /// Returns [`Status::SUCCESS`] on an orderly close, otherwise the first
    /// fatal status. Children still alive are killed and reaped before this
    /// returns.
    pub fn run(mut self) -> Status {
        let status = match self.serve() {
            Ok(()) => Status::SUCCESS,
            Err(status) => {
                tracing::error!("[EventLoop] stopping: {}", status);
                status
            }
        };
        if !self.table.is_empty() {
            tracing::info!("[EventLoop] reaping {} remaining child(ren)", self.table.len());
        }
        drop(self.table);
        status
    }

    fn serve(&mut self) -> Result<(), Status> {
        loop {
            if !self.turn()? {
                return Ok(());
            }
        }
    }

    /// One wake. `Ok(false)` once the host has closed.
    pub fn turn(&mut self) -> Result<bool, Status> {
        let (mut events, requests) = match self.host.wait(&mut self.poll)? {
            Wake::Closed => return Ok(false),
            Wake::Ready { events, requests } => (events, requests),
        };

        for request in requests {
            let result = request.and_then(|request| {
                spawner::spawn(&request, &mut self.poll, &mut self.table, &self.config)
            });
            if let Err(status) = result {
                tracing::warn!("[EventLoop] spawn failed: {}", status);
            }
            self.host.reply(result)?;
        }

        let reaped = self.table.drain(&mut events, &mut self.poll, &mut self.host)?;
        for done in reaped {
            tracing::debug!("[EventLoop] {} retired with {}", done.pid, done.status);
        }
        debug_assert!(self.table.is_consistent_with(&self.poll));
        Ok(true)
    }
}
