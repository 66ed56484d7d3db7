// Circular Segment Buffer: fixed-capacity byte store for one cached channel.
//
// Positions are tracked as absolute, monotonically increasing byte offsets.
// Only addressing into the backing region is reduced modulo the capacity, so a
// segment is still valid exactly when its first byte has not been overwritten.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::trace;

use crate::config::BufferConfig;
use crate::error::{PrebufferError, Result};

/// Metadata of a segment that is still resident in a [`SegmentBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentInfo {
    pub id: String,
    /// Position of the first byte inside the buffer region
    pub offset: usize,
    pub length: usize,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug)]
struct SegmentRecord {
    id: String,
    start: u64,
    length: usize,
    timestamp: DateTime<Utc>,
    duration: Duration,
}

impl SegmentRecord {
    fn end(&self) -> u64 {
        self.start + self.length as u64
    }
}

#[derive(Debug)]
struct BufferState {
    data: Box<[u8]>,
    /// Absolute offset of the next byte to be written
    head: u64,
    /// Absolute offset of the next byte to be read
    tail: u64,
    segments: VecDeque<SegmentRecord>,
}

impl BufferState {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn len(&self) -> usize {
        (self.head - self.tail) as usize
    }

    /// Oldest absolute offset whose byte is still physically present.
    fn oldest_resident(&self) -> u64 {
        self.head.saturating_sub(self.capacity() as u64)
    }

    fn copy_in(&mut self, mut bytes: &[u8]) {
        let capacity = self.capacity();
        if bytes.len() > capacity {
            let skipped = bytes.len() - capacity;
            self.head += skipped as u64;
            bytes = &bytes[skipped..];
        }

        let pos = (self.head % capacity as u64) as usize;
        let first = (capacity - pos).min(bytes.len());
        self.data[pos..pos + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&bytes[first..]);
        }
        self.head += bytes.len() as u64;

        let oldest = self.oldest_resident();
        if self.tail < oldest {
            self.tail = oldest;
        }
        while self
            .segments
            .front()
            .is_some_and(|segment| segment.start < oldest)
        {
            if let Some(pruned) = self.segments.pop_front() {
                trace!(segment = %pruned.id, "Pruned overwritten segment");
            }
        }
    }

    fn copy_out(&self, start: u64, len: usize) -> Bytes {
        let capacity = self.capacity();
        let pos = (start % capacity as u64) as usize;
        let first = (capacity - pos).min(len);
        let mut out = BytesMut::with_capacity(len);
        out.extend_from_slice(&self.data[pos..pos + first]);
        if len > first {
            out.extend_from_slice(&self.data[..len - first]);
        }
        out.freeze()
    }

    fn info(&self, record: &SegmentRecord) -> SegmentInfo {
        SegmentInfo {
            id: record.id.clone(),
            offset: (record.start % self.capacity() as u64) as usize,
            length: record.length,
            timestamp: record.timestamp,
            duration: record.duration,
        }
    }
}

/// Fixed-capacity circular byte store with segment metadata.
///
/// One fetch task writes, any number of readers drain or snapshot. All state
/// lives behind a single reader/writer lock.
#[derive(Debug)]
pub struct SegmentBuffer {
    state: RwLock<BufferState>,
    max_segments: usize,
    data_ready: Notify,
}

impl SegmentBuffer {
    pub fn new(capacity: usize, max_segments: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: RwLock::new(BufferState {
                data: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                segments: VecDeque::with_capacity(max_segments.min(64)),
            }),
            max_segments: max_segments.max(1),
            data_ready: Notify::new(),
        }
    }

    pub fn with_config(config: &BufferConfig) -> Self {
        Self::new(config.capacity, config.max_segments)
    }

    pub fn capacity(&self) -> usize {
        self.state.read().capacity()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of bytes ever written, including overwritten ones.
    pub fn total_written(&self) -> u64 {
        self.state.read().head
    }

    pub fn segment_count(&self) -> usize {
        self.state.read().segments.len()
    }

    /// Appends raw bytes, overwriting the oldest data once the buffer is full.
    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.state.write().copy_in(bytes);
        self.data_ready.notify_waiters();
    }

    /// Appends one segment and records its metadata.
    pub fn write_segment(
        &self,
        id: impl Into<String>,
        bytes: &[u8],
        timestamp: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        {
            let mut state = self.state.write();
            let capacity = state.capacity();
            if bytes.len() > capacity {
                return Err(PrebufferError::SegmentTooLarge {
                    size: bytes.len(),
                    capacity,
                });
            }

            let start = state.head;
            state.copy_in(bytes);
            state.segments.push_back(SegmentRecord {
                id: id.into(),
                start,
                length: bytes.len(),
                timestamp,
                duration,
            });
            while state.segments.len() > self.max_segments {
                state.segments.pop_front();
            }
        }
        self.data_ready.notify_waiters();
        Ok(())
    }

    /// Drains up to `n` bytes from the tail. Returns `None` when nothing is buffered.
    pub fn read(&self, n: usize) -> Option<Bytes> {
        let mut state = self.state.write();
        let available = state.len();
        if available == 0 {
            return None;
        }
        let take = n.min(available);
        let out = state.copy_out(state.tail, take);
        state.tail += take as u64;
        Some(out)
    }

    /// Like [`read`](Self::read) without consuming the bytes.
    pub fn peek(&self, n: usize) -> Option<Bytes> {
        let state = self.state.read();
        let available = state.len();
        if available == 0 {
            return None;
        }
        Some(state.copy_out(state.tail, n.min(available)))
    }

    /// Reconstructs a segment's bytes if it has not been overwritten yet.
    pub fn read_segment(&self, id: &str) -> Option<Bytes> {
        let state = self.state.read();
        let oldest = state.oldest_resident();
        state
            .segments
            .iter()
            .rev()
            .find(|segment| segment.id == id && segment.start >= oldest)
            .map(|segment| state.copy_out(segment.start, segment.length))
    }

    /// Snapshot of every unread byte, used to prime a new player instantly.
    pub fn all_data(&self) -> Bytes {
        let state = self.state.read();
        state.copy_out(state.tail, state.len())
    }

    /// Total playback time of the segments that still have unread bytes.
    pub fn buffered_duration(&self) -> Duration {
        let state = self.state.read();
        state
            .segments
            .iter()
            .filter(|segment| segment.end() > state.tail)
            .map(|segment| segment.duration)
            .sum()
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        let state = self.state.read();
        state
            .segments
            .iter()
            .map(|segment| state.info(segment))
            .collect()
    }

    pub fn last_segment(&self) -> Option<SegmentInfo> {
        let state = self.state.read();
        state.segments.back().map(|segment| state.info(segment))
    }

    /// Drops all buffered bytes and segment records.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.tail = state.head;
        state.segments.clear();
    }

    /// Resolves once the buffer holds unread bytes.
    pub async fn wait_for_data(&self) {
        loop {
            let notified = self.data_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn write_and_read_basic() {
        let buffer = SegmentBuffer::new(16, 50);
        buffer.write(b"hello");
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.peek(3).unwrap().as_ref(), b"hel");
        assert_eq!(buffer.len(), 5);

        assert_eq!(buffer.read(3).unwrap().as_ref(), b"hel");
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.read(10).unwrap().as_ref(), b"lo");
        assert!(buffer.read(1).is_none());
        assert!(buffer.peek(1).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn reads_across_wraparound() {
        let buffer = SegmentBuffer::new(8, 50);
        buffer.write(b"abcdef");
        assert_eq!(buffer.read(4).unwrap().as_ref(), b"abcd");
        buffer.write(b"ghijk");
        assert_eq!(buffer.len(), 7);
        assert_eq!(buffer.all_data().as_ref(), b"efghijk");
    }

    #[test]
    fn overwrite_moves_tail_forward() {
        let buffer = SegmentBuffer::new(10, 50);
        buffer.write(b"0123456789");
        buffer.write(b"abc");
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.all_data().as_ref(), b"3456789abc");
    }

    #[test]
    fn oversized_raw_write_keeps_trailing_bytes() {
        let buffer = SegmentBuffer::new(4, 50);
        buffer.write(b"abcdefgh");
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.all_data().as_ref(), b"efgh");
        assert_eq!(buffer.total_written(), 8);
    }

    #[test]
    fn write_segment_rejects_oversized_payload() {
        let buffer = SegmentBuffer::new(10, 50);
        let err = buffer
            .write_segment("big", &[0u8; 11], Utc::now(), secs(6))
            .unwrap_err();
        assert!(matches!(
            err,
            PrebufferError::SegmentTooLarge {
                size: 11,
                capacity: 10
            }
        ));
        assert!(buffer.is_empty());
        assert_eq!(buffer.segment_count(), 0);
    }

    #[test]
    fn segment_round_trip() {
        let buffer = SegmentBuffer::new(64, 50);
        buffer
            .write_segment("1", b"first", Utc::now(), secs(2))
            .unwrap();
        buffer
            .write_segment("2", b"second", Utc::now(), secs(2))
            .unwrap();

        assert_eq!(buffer.read_segment("1").unwrap().as_ref(), b"first");
        assert_eq!(buffer.read_segment("2").unwrap().as_ref(), b"second");
        assert!(buffer.read_segment("3").is_none());

        let infos = buffer.segments();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[1].offset, 5);
        assert_eq!(infos[1].length, 6);
    }

    #[test]
    fn segment_spanning_wraparound_is_reconstructed() {
        let buffer = SegmentBuffer::new(10, 50);
        buffer.write_segment("a", b"aaaaaaa", Utc::now(), secs(1)).unwrap();
        buffer.write_segment("b", b"bbbbb", Utc::now(), secs(1)).unwrap();

        // "a" lost its first two bytes, "b" straddles the end of the region.
        assert!(buffer.read_segment("a").is_none());
        assert_eq!(buffer.read_segment("b").unwrap().as_ref(), b"bbbbb");
        assert_eq!(buffer.segments()[0].offset, 7);
    }

    #[test]
    fn three_segments_into_capacity_100() {
        let buffer = SegmentBuffer::new(100, 50);
        for id in ["s1", "s2", "s3"] {
            buffer
                .write_segment(id, &[7u8; 40], Utc::now(), secs(6))
                .unwrap();
        }

        assert_eq!(buffer.len(), 100);
        assert!(buffer.read_segment("s1").is_none());
        let ids: Vec<_> = buffer.segments().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["s2", "s3"]);
        assert_eq!(buffer.buffered_duration(), secs(12));
    }

    #[test]
    fn segment_records_are_bounded() {
        let buffer = SegmentBuffer::new(1024, 3);
        for i in 0..5 {
            buffer
                .write_segment(i.to_string(), b"xy", Utc::now(), secs(1))
                .unwrap();
        }
        let ids: Vec<_> = buffer.segments().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn buffered_duration_ignores_fully_read_segments() {
        let buffer = SegmentBuffer::new(100, 50);
        buffer.write_segment("1", &[1u8; 10], Utc::now(), secs(4)).unwrap();
        buffer.write_segment("2", &[2u8; 10], Utc::now(), secs(6)).unwrap();
        assert_eq!(buffer.buffered_duration(), secs(10));

        buffer.read(10);
        assert_eq!(buffer.buffered_duration(), secs(6));
        buffer.read(5);
        assert_eq!(buffer.buffered_duration(), secs(6));
        buffer.read(5);
        assert_eq!(buffer.buffered_duration(), Duration::ZERO);
    }

    #[test]
    fn clear_drops_everything() {
        let buffer = SegmentBuffer::new(32, 50);
        buffer.write_segment("1", b"abc", Utc::now(), secs(1)).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.segment_count(), 0);
        assert!(buffer.last_segment().is_none());
    }

    #[tokio::test]
    async fn wait_for_data_wakes_on_write() {
        let buffer = Arc::new(SegmentBuffer::new(32, 50));
        let waiter = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                buffer.wait_for_data().await;
                buffer.read(32)
            })
        };
        tokio::task::yield_now().await;
        buffer.write(b"ping");
        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake")
            .expect("task should not panic");
        assert_eq!(got.unwrap().as_ref(), b"ping");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Writing at most `capacity` bytes never prunes and never loses bytes.
        #[test]
        fn prop_writes_within_capacity_are_kept(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..32), 1..20),
        ) {
            let total: usize = chunks.iter().map(Vec::len).sum();
            let buffer = SegmentBuffer::new(total, 64);
            let mut expected = Vec::new();
            for (i, chunk) in chunks.iter().enumerate() {
                buffer.write_segment(i.to_string(), chunk, Utc::now(), Duration::from_secs(1)).unwrap();
                expected.extend_from_slice(chunk);
            }

            prop_assert_eq!(buffer.len(), total);
            prop_assert_eq!(buffer.segment_count(), chunks.len());
            let all = buffer.all_data();
            prop_assert_eq!(all.as_ref(), expected.as_slice());
            for (i, chunk) in chunks.iter().enumerate() {
                let segment = buffer.read_segment(&i.to_string()).unwrap();
                prop_assert_eq!(segment.as_ref(), chunk.as_slice());
            }
        }

        /// Past capacity the length is capped and only fully resident segments remain.
        #[test]
        fn prop_overwrite_caps_length_and_prunes(
            capacity in 8usize..128,
            sizes in prop::collection::vec(1usize..64, 1..40),
        ) {
            let buffer = SegmentBuffer::new(capacity, 1000);
            let mut written = 0usize;
            let mut accepted = Vec::new();
            for (i, size) in sizes.iter().enumerate() {
                let payload = vec![(i % 251) as u8; *size];
                if buffer.write_segment(i.to_string(), &payload, Utc::now(), Duration::from_secs(1)).is_ok() {
                    accepted.push((i, written, *size));
                    written += size;
                }
            }

            prop_assert_eq!(buffer.len(), written.min(capacity));
            let oldest = written.saturating_sub(capacity);
            for (i, start, size) in accepted {
                let segment = buffer.read_segment(&i.to_string());
                if start >= oldest {
                    let segment = segment.unwrap();
                    prop_assert_eq!(segment.len(), size);
                    prop_assert!(segment.iter().all(|b| *b == (i % 251) as u8));
                } else {
                    prop_assert!(segment.is_none());
                }
            }
            let resident: usize = buffer.segments().iter().map(|s| s.length).sum();
            prop_assert!(resident <= capacity);
        }
    }
}
