//! Fixed-capacity byte ring buffer with a contiguous-slice API.
//!
//! Corresponds to spec.md §3 "Ring buffer" and §4.2. Used by the transfer
//! engine (one per direction) and by each broker peer's outbound queue.
//!
//! Indices advance in the `u64` domain so a long-lived session on a 32-bit
//! target cannot wrap `written`/`consumed` into ambiguous state; only the
//! final slice arithmetic truncates to `usize`.

/// A fixed-capacity single-producer/single-consumer byte ring.
///
/// Invariants (spec.md §3, §4.2), maintained by construction:
/// - `len() <= capacity()` always.
/// - the high-water mark monotonically tracks `max(len)` since the last
///   [`Self::reset`] or [`Self::clear_overflow`].
/// - [`Self::write_all`] either writes every byte or writes none and sets
///   the sticky overflow flag; it never partially writes.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Vec<u8>,
    capacity: usize,
    /// Total bytes ever committed via `commit_write`, mod 2^64.
    written: u64,
    /// Total bytes ever removed via `consume`, mod 2^64.
    consumed: u64,
    high_water: usize,
    overflowed: bool,
}

/// A possibly-split view into the ring's readable or writable region.
///
/// When the ring wraps, the first slice covers up to the capacity boundary
/// and `second` covers the remainder from offset 0. Callers that need to
/// fill or drain the whole span must consider both.
#[derive(Debug)]
pub struct Span<'a> {
    pub first: &'a [u8],
    pub second: &'a [u8],
}

impl<'a> Span<'a> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mutable counterpart of [`Span`], used for the writable region.
#[derive(Debug)]
pub struct SpanMut<'a> {
    pub first: &'a mut [u8],
    pub second: &'a mut [u8],
}

impl<'a> SpanMut<'a> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returned by [`RingBuffer::write_all`] when there isn't enough free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ring buffer overflow: {requested} requested, {available} available")]
pub struct Overflow {
    pub requested: usize,
    pub available: usize,
}

impl RingBuffer {
    /// Create a ring with room for `capacity` bytes. `capacity` of 0 is
    /// legal but degenerate (every write overflows).
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            capacity,
            written: 0,
            consumed: 0,
            high_water: 0,
            overflowed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered (written but not yet consumed).
    pub fn len(&self) -> usize {
        (self.written - self.consumed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity - self.len()
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear_overflow(&mut self) {
        self.overflowed = false;
    }

    /// Reset to empty, clearing the high-water mark and overflow flag.
    pub fn reset(&mut self) {
        self.written = 0;
        self.consumed = 0;
        self.high_water = 0;
        self.overflowed = false;
    }

    fn write_index(&self) -> usize {
        (self.written as usize) % self.capacity.max(1)
    }

    fn read_index(&self) -> usize {
        (self.consumed as usize) % self.capacity.max(1)
    }

    /// The region available to write into. May be split across the
    /// capacity boundary; callers that need to fill the buffer must loop,
    /// writing `first` then re-querying for `second`.
    pub fn writable_slice(&mut self) -> SpanMut<'_> {
        let free = self.free();
        if free == 0 || self.capacity == 0 {
            return SpanMut { first: &mut [], second: &mut [] };
        }
        let start = self.write_index();
        let until_wrap = self.capacity - start;
        if free <= until_wrap {
            SpanMut { first: &mut self.buf[start..start + free], second: &mut [] }
        } else {
            let (tail, head) = self.buf.split_at_mut(start);
            let second_len = free - until_wrap;
            SpanMut { first: &mut head[..until_wrap], second: &mut tail[..second_len] }
        }
    }

    /// Mark `n` bytes (previously written into [`Self::writable_slice`]) as
    /// committed. `n` must not exceed the free space at the time of the
    /// matching `writable_slice` call.
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(n <= self.free(), "commit_write exceeds free space");
        self.written = self.written.wrapping_add(n as u64);
        self.high_water = self.high_water.max(self.len());
    }

    /// The region available to read. May be split across the capacity
    /// boundary.
    pub fn readable_slice(&self) -> Span<'_> {
        let len = self.len();
        if len == 0 || self.capacity == 0 {
            return Span { first: &[], second: &[] };
        }
        let start = self.read_index();
        let until_wrap = self.capacity - start;
        if len <= until_wrap {
            Span { first: &self.buf[start..start + len], second: &[] }
        } else {
            Span { first: &self.buf[start..], second: &self.buf[..len - until_wrap] }
        }
    }

    /// Mark `n` bytes (previously read via [`Self::readable_slice`]) as
    /// consumed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len(), "consume exceeds buffered length");
        self.consumed = self.consumed.wrapping_add(n as u64);
    }

    /// Write `data` in full, looping across the wrap boundary as needed.
    /// On overflow, no bytes are written and the sticky overflow flag is
    /// set; existing buffered data is left untouched.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Overflow> {
        if data.len() > self.free() {
            self.overflowed = true;
            return Err(Overflow { requested: data.len(), available: self.free() });
        }
        let mut offset = 0;
        while offset < data.len() {
            let mut span = self.writable_slice();
            let take_first = span.first.len().min(data.len() - offset);
            span.first[..take_first].copy_from_slice(&data[offset..offset + take_first]);
            offset += take_first;
            self.commit_write(take_first);
            if take_first == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Read as many bytes as fit into `dst`, looping across the wrap
    /// boundary. Returns the number of bytes copied.
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let mut offset = 0;
        while offset < dst.len() {
            let span = self.readable_slice();
            if span.is_empty() {
                break;
            }
            let take_first = span.first.len().min(dst.len() - offset);
            dst[offset..offset + take_first].copy_from_slice(&span.first[..take_first]);
            offset += take_first;
            self.consume(take_first);
            if take_first == 0 {
                break;
            }
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut rb = RingBuffer::new(16);
        rb.write_all(b"hello").unwrap();
        let mut out = [0u8; 5];
        assert_eq!(rb.read_into(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert!(rb.is_empty());
    }

    #[test]
    fn overflow_sets_sticky_flag_and_writes_nothing() {
        let mut rb = RingBuffer::new(4);
        rb.write_all(b"ab").unwrap();
        let err = rb.write_all(b"xyz").unwrap_err();
        assert_eq!(err, Overflow { requested: 3, available: 2 });
        assert!(rb.overflowed());
        // The failed write must not have partially landed.
        let mut out = [0u8; 4];
        assert_eq!(rb.read_into(&mut out), 2);
        assert_eq!(&out[..2], b"ab");
    }

    #[test]
    fn clear_overflow_resets_flag_without_touching_data() {
        let mut rb = RingBuffer::new(2);
        let _ = rb.write_all(b"abc");
        assert!(rb.overflowed());
        rb.clear_overflow();
        assert!(!rb.overflowed());
    }

    #[test]
    fn wraparound_produces_two_spans() {
        let mut rb = RingBuffer::new(4);
        rb.write_all(b"abcd").unwrap();
        let mut tmp = [0u8; 2];
        rb.read_into(&mut tmp); // consume "ab", read index now at 2
        rb.write_all(b"ef").unwrap(); // wraps: writes "e" at 0? no -- free space is at end then start
        let span = rb.readable_slice();
        // "cd" then "ef" wrapped
        let mut collected = span.first.to_vec();
        collected.extend_from_slice(span.second);
        assert_eq!(collected, b"cdef");
    }

    #[test]
    fn high_water_mark_tracks_max_length_since_reset() {
        let mut rb = RingBuffer::new(8);
        rb.write_all(b"abcd").unwrap();
        let mut tmp = [0u8; 4];
        rb.read_into(&mut tmp);
        rb.write_all(b"xy").unwrap();
        assert_eq!(rb.high_water_mark(), 4);
        rb.reset();
        assert_eq!(rb.high_water_mark(), 0);
    }

    #[test]
    fn len_never_exceeds_capacity_under_random_ops() {
        let mut rb = RingBuffer::new(13);
        let mut model: Vec<u8> = Vec::new();
        let mut rng_state: u64 = 0x1234_5678;
        let mut next = || {
            rng_state ^= rng_state << 13;
            rng_state ^= rng_state >> 7;
            rng_state ^= rng_state << 17;
            rng_state
        };
        for _ in 0..2000 {
            assert!(rb.len() <= rb.capacity());
            if next() % 2 == 0 {
                let n = (next() % 5) as usize;
                let data: Vec<u8> = (0..n).map(|i| i as u8).collect();
                if rb.write_all(&data).is_ok() {
                    model.extend_from_slice(&data);
                }
            } else {
                let n = (next() % 5) as usize;
                let mut buf = vec![0u8; n];
                let got = rb.read_into(&mut buf);
                assert_eq!(&buf[..got], &model[..got]);
                model.drain(..got);
            }
        }
    }

    #[test]
    fn zero_capacity_ring_always_overflows_nonempty_writes() {
        let mut rb = RingBuffer::new(0);
        assert!(rb.write_all(b"x").is_err());
        assert!(rb.write_all(b"").is_ok());
    }
}
