// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How much room `fill_from` guarantees before reading from the socket.
const FILL_CHUNK: usize = 4 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufError {
    #[error("buffer growth past {limit} bytes refused (need {need})")]
    OutOfMemory { limit: usize, need: usize },
}

/// Growable parse buffer with separate read and write cursors.
///
/// Bytes live in `data[service..end]`. Consuming advances `service`,
/// appending advances `end`, and `compact` slides the unread region back to
/// the front once the tail runs out. This supports the "consume N from the
/// front, append M at the back" pattern of incremental parsing without
/// copying on every operation.
#[derive(Debug)]
pub struct PacketBuf {
    data: Vec<u8>,
    /// Read cursor: first unconsumed byte.
    service: usize,
    /// Write cursor: one past the last valid byte.
    end: usize,
    /// Growth ceiling; `reserve` past it fails with `OutOfMemory`.
    limit: usize,
}

impl PacketBuf {
    pub fn new(initial: usize, limit: usize) -> Self {
        Self {
            data: vec![0; initial.min(limit)],
            service: 0,
            end: 0,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.service
    }

    pub fn is_empty(&self) -> bool {
        self.service == self.end
    }

    /// The unconsumed region.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.service..self.end]
    }

    /// Slides unread bytes to the front, reclaiming consumed space.
    pub fn compact(&mut self) {
        if self.service == 0 {
            return;
        }
        self.data.copy_within(self.service..self.end, 0);
        self.end -= self.service;
        self.service = 0;
    }

    /// Ensures `n` bytes of tail room, compacting first and growing the
    /// backing store if needed.
    pub fn reserve(&mut self, n: usize) -> Result<(), BufError> {
        if self.data.len() - self.end >= n {
            return Ok(());
        }
        self.compact();
        if self.data.len() - self.end >= n {
            return Ok(());
        }
        let need = self.end + n;
        if need > self.limit {
            return Err(BufError::OutOfMemory {
                limit: self.limit,
                need,
            });
        }
        let new_len = (self.data.len().max(64) * 2).clamp(need, self.limit);
        self.data.resize(new_len, 0);
        Ok(())
    }

    pub fn putc(&mut self, b: u8) -> Result<(), BufError> {
        self.put_block(&[b])
    }

    pub fn puts(&mut self, s: &str) -> Result<(), BufError> {
        self.put_block(s.as_bytes())
    }

    pub fn put_block(&mut self, block: &[u8]) -> Result<(), BufError> {
        self.reserve(block.len())?;
        self.data[self.end..self.end + block.len()].copy_from_slice(block);
        self.end += block.len();
        Ok(())
    }

    pub fn getc(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let b = self.data[self.service];
        self.service += 1;
        b.into()
    }

    /// Copies out up to `n` bytes from the front and consumes them.
    pub fn get_block(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.len());
        let out = self.data[self.service..self.service + take].to_vec();
        self.service += take;
        out
    }

    /// Discards `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.service += n.min(self.len());
        if self.is_empty() {
            self.service = 0;
            self.end = 0;
        }
    }

    /// Reads once from `r` into the tail. Returns the byte count; 0 is EOF.
    pub async fn fill_from<R>(&mut self, r: &mut R) -> io::Result<usize>
    where R: AsyncRead + Unpin {
        self.reserve(FILL_CHUNK.min(self.limit - self.len()).max(1))
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        let n = r.read(&mut self.data[self.end..]).await?;
        self.end += n;
        Ok(n)
    }

    /// Writes once to `w` from the service pointer and advances it by the
    /// bytes actually taken. Partial progress is preserved for the caller to
    /// retry.
    pub async fn drain_to<W>(&mut self, w: &mut W) -> io::Result<usize>
    where W: AsyncWrite + Unpin {
        if self.is_empty() {
            return Ok(0);
        }
        let n = w.write(&self.data[self.service..self.end]).await?;
        self.consume(n);
        Ok(n)
    }
}
