// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ordered reassembly of received byte ranges, shared by stream receive
//! halves and the per-space CRYPTO streams.

use bytes::Bytes;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Buffering the range would exceed the configured capacity
    CapacityExceeded,
}

/// Reorders byte ranges into a contiguous stream.
///
/// Overlapping and duplicate ranges are resolved by keeping the
/// first-seen copy of every byte. Total buffered (not yet readable or
/// readable-but-unread) bytes are bounded by `capacity`.
#[derive(Debug)]
pub struct Reassembler {
    /// start offset -> chunk; chunks never overlap
    chunks: BTreeMap<u64, Bytes>,
    read_offset: u64,
    buffered: usize,
    capacity: usize,
}

impl Reassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: BTreeMap::new(),
            read_offset: 0,
            buffered: 0,
            capacity,
        }
    }

    /// The offset of the next byte the application will read
    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// The end of the highest buffered or delivered byte
    pub fn highest_offset(&self) -> u64 {
        self.chunks
            .iter()
            .next_back()
            .map(|(start, chunk)| start + chunk.len() as u64)
            .unwrap_or(self.read_offset)
    }

    /// True if every byte below `final_size` has been received
    pub fn is_complete_up_to(&self, final_size: u64) -> bool {
        let mut expected = self.read_offset;
        for (start, chunk) in &self.chunks {
            if *start != expected {
                return false;
            }
            expected = start + chunk.len() as u64;
        }
        expected >= final_size
    }

    /// Inserts a received range. Bytes already delivered or already
    /// buffered are ignored.
    pub fn insert(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut start = offset;
        let mut data = data;

        // drop anything already delivered
        if start < self.read_offset {
            let skip = (self.read_offset - start).min(data.len() as u64) as usize;
            data = &data[skip..];
            start = self.read_offset;
        }

        while !data.is_empty() {
            let end = start + data.len() as u64;

            // the first existing chunk that could overlap `start..end`
            let existing = self
                .chunks
                .range(..=start)
                .next_back()
                .map(|(s, c)| (*s, s + c.len() as u64))
                .filter(|(_, e)| *e > start)
                .or_else(|| {
                    self.chunks
                        .range(start..end)
                        .next()
                        .map(|(s, c)| (*s, s + c.len() as u64))
                });

            match existing {
                // a chunk covers our start; skip the covered prefix
                Some((chunk_start, chunk_end)) if chunk_start <= start => {
                    let skip = (chunk_end - start).min(data.len() as u64) as usize;
                    data = &data[skip..];
                    start = chunk_end.max(start);
                }
                // a chunk begins inside our range; insert the gap before it
                Some((chunk_start, _)) => {
                    let gap = (chunk_start - start) as usize;
                    self.store(start, &data[..gap])?;
                    data = &data[gap..];
                    start = chunk_start;
                }
                // no overlap at all
                None => {
                    self.store(start, data)?;
                    break;
                }
            }
        }

        Ok(())
    }

    fn store(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        if self.buffered + data.len() > self.capacity {
            return Err(Error::CapacityExceeded);
        }
        self.buffered += data.len();
        self.chunks.insert(offset, Bytes::copy_from_slice(data));
        Ok(())
    }

    /// Pops the next contiguous chunk, if any bytes are ready
    pub fn pop(&mut self) -> Option<Bytes> {
        let (&start, _) = self.chunks.iter().next()?;
        if start != self.read_offset {
            return None;
        }
        let chunk = self.chunks.remove(&start)?;
        self.read_offset += chunk.len() as u64;
        self.buffered -= chunk.len();
        Some(chunk)
    }

    /// Copies as many ready bytes as fit into `out`, returning the count
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < out.len() {
            let Some((&start, chunk)) = self.chunks.iter().next() else {
                break;
            };
            if start != self.read_offset {
                break;
            }
            let take = chunk.len().min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&chunk[..take]);
            copied += take;
            self.read_offset += take as u64;
            self.buffered -= take;

            if take == chunk.len() {
                self.chunks.remove(&start);
            } else {
                let rest = self.chunks.remove(&start).expect("chunk exists").slice(take..);
                self.chunks.insert(self.read_offset, rest);
            }
        }
        copied
    }

    /// Discards all buffered data, e.g. after a stream reset
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"hello ").unwrap();
        buffer.insert(6, b"world").unwrap();
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(b"hello "));
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(b"world"));
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.read_offset(), 11);
    }

    #[test]
    fn out_of_order_waits_for_gap() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(3, b"def").unwrap();
        assert!(buffer.pop().is_none());
        buffer.insert(0, b"abc").unwrap();

        let mut out = [0u8; 6];
        assert_eq!(buffer.read(&mut out), 6);
        assert_eq!(&out, b"abcdef");
    }

    #[test]
    fn overlap_keeps_first_copy() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"AAAA").unwrap();
        // overlapping write with different content must not win
        buffer.insert(2, b"BBBB").unwrap();

        let mut out = [0u8; 6];
        assert_eq!(buffer.read(&mut out), 6);
        assert_eq!(&out, b"AAAABB");
    }

    #[test]
    fn duplicate_is_ignored() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"abc").unwrap();
        buffer.insert(0, b"abc").unwrap();
        buffer.insert(1, b"b").unwrap();

        let mut out = [0u8; 8];
        assert_eq!(buffer.read(&mut out), 3);
    }

    #[test]
    fn old_bytes_are_dropped() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"abcd").unwrap();
        let mut out = [0u8; 4];
        assert_eq!(buffer.read(&mut out), 4);

        // a retransmission of delivered data plus one new byte
        buffer.insert(0, b"abcde").unwrap();
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(b"e"));
    }

    #[test]
    fn capacity_is_enforced() {
        let mut buffer = Reassembler::new(4);
        buffer.insert(0, b"abcd").unwrap();
        assert_eq!(buffer.insert(10, b"x"), Err(Error::CapacityExceeded));

        // draining makes room again
        let mut out = [0u8; 4];
        buffer.read(&mut out);
        buffer.insert(10, b"x").unwrap();
    }

    #[test]
    fn completeness_check() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"ab").unwrap();
        buffer.insert(4, b"ef").unwrap();
        assert!(!buffer.is_complete_up_to(6));
        buffer.insert(2, b"cd").unwrap();
        assert!(buffer.is_complete_up_to(6));
        assert!(!buffer.is_complete_up_to(7));
    }

    #[test]
    fn partial_read_splits_chunk() {
        let mut buffer = Reassembler::new(1024);
        buffer.insert(0, b"abcdef").unwrap();
        let mut out = [0u8; 2];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(buffer.pop().unwrap(), Bytes::from_static(b"cdef"));
    }
}
