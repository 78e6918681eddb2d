//! Dense sorted array of fixed-length records over one byte region.

use crate::record::Record;
use bytes::BytesMut;
use std::cmp::Ordering;

/// A sorted, duplicate-free run of fixed-length records stored back to back.
///
/// Slot `i` occupies bytes `[i * record_len, (i + 1) * record_len)`. Slots
/// at or past `count` are unused. Capacity checks are assertions: callers
/// inside the tree test `is_full` before adding and split first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBuffer {
    data: BytesMut,
    count: usize,
    max_size: usize,
    record_len: usize,
    key_len: usize,
}

impl RecordBuffer {
    /// Creates an empty buffer for `max_size` records.
    pub fn new(max_size: usize, record_len: usize, key_len: usize) -> Self {
        debug_assert!(key_len <= record_len);
        Self {
            data: BytesMut::zeroed(max_size * record_len),
            count: 0,
            max_size,
            record_len,
            key_len,
        }
    }

    /// Loads `count` records from an encoded region.
    pub(crate) fn from_region(
        region: &[u8],
        count: usize,
        max_size: usize,
        record_len: usize,
        key_len: usize,
    ) -> Self {
        let mut buffer = Self::new(max_size, record_len, key_len);
        let used = count * record_len;
        buffer.data[..used].copy_from_slice(&region[..used]);
        buffer.count = count;
        buffer
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.max_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    fn slot(&self, idx: usize) -> &[u8] {
        let start = idx * self.record_len;
        &self.data[start..start + self.record_len]
    }

    /// Key bytes of the record at `idx`.
    #[inline]
    pub fn key_at(&self, idx: usize) -> &[u8] {
        debug_assert!(idx < self.count);
        &self.slot(idx)[..self.key_len]
    }

    /// Copies out the record at `idx`.
    pub fn get(&self, idx: usize) -> Record {
        assert!(idx < self.count, "index {} out of range {}", idx, self.count);
        Record::from_slice(self.slot(idx), self.key_len)
    }

    pub fn low(&self) -> Option<Record> {
        (self.count > 0).then(|| self.get(0))
    }

    pub fn high(&self) -> Option<Record> {
        (self.count > 0).then(|| self.get(self.count - 1))
    }

    /// Binary search by key.
    ///
    /// Returns `Ok(i)` when slot `i` holds the key, or `Err(i)` with the slot
    /// the key would be inserted at.
    pub fn find(&self, key: &[u8]) -> Result<usize, usize> {
        let mut lo = 0;
        let mut hi = self.count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_at(mid).cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(mid),
            }
        }
        Err(lo)
    }

    /// Inserts a record at its sorted position.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is full or already holds the key.
    pub fn add(&mut self, record: &Record) -> usize {
        match self.find(record.key()) {
            Ok(idx) => panic!("duplicate key {} at slot {}", record.key_only(), idx),
            Err(idx) => {
                self.insert_at(idx, record);
                idx
            }
        }
    }

    /// Inserts a record at `idx`, moving later records up one slot.
    ///
    /// The caller keeps the buffer sorted.
    pub fn insert_at(&mut self, idx: usize, record: &Record) {
        assert!(!self.is_full(), "insert into full buffer ({})", self.max_size);
        assert!(idx <= self.count);
        assert_eq!(record.len(), self.record_len, "record length");

        let rl = self.record_len;
        self.data
            .copy_within(idx * rl..self.count * rl, (idx + 1) * rl);
        self.data[idx * rl..(idx + 1) * rl].copy_from_slice(record.as_bytes());
        self.count += 1;
    }

    /// Overwrites the record at `idx`.
    pub fn set(&mut self, idx: usize, record: &Record) {
        assert!(idx < self.count);
        assert_eq!(record.len(), self.record_len, "record length");
        let rl = self.record_len;
        self.data[idx * rl..(idx + 1) * rl].copy_from_slice(record.as_bytes());
    }

    /// Removes and returns the record at `idx`, moving later records down.
    pub fn remove(&mut self, idx: usize) -> Record {
        let record = self.get(idx);
        let rl = self.record_len;
        self.data
            .copy_within((idx + 1) * rl..self.count * rl, idx * rl);
        self.count -= 1;
        self.clear_tail();
        record
    }

    /// Moves this buffer's top `n` records to the front of `dest`.
    ///
    /// `dest` must hold only keys above this buffer's remaining keys.
    pub fn shift_right(&mut self, n: usize, dest: &mut RecordBuffer) {
        assert!(n <= self.count, "shift of {} from {}", n, self.count);
        assert!(dest.count + n <= dest.max_size, "shift overflows destination");
        debug_assert_eq!(self.record_len, dest.record_len);
        if n == 0 {
            return;
        }

        let rl = self.record_len;
        dest.data.copy_within(0..dest.count * rl, n * rl);
        let from = (self.count - n) * rl;
        dest.data[..n * rl].copy_from_slice(&self.data[from..self.count * rl]);
        dest.count += n;

        self.count -= n;
        self.clear_tail();
    }

    /// Moves this buffer's bottom `n` records to the end of `dest`.
    ///
    /// `dest` must hold only keys below this buffer's keys.
    pub fn shift_left(&mut self, n: usize, dest: &mut RecordBuffer) {
        assert!(n <= self.count, "shift of {} from {}", n, self.count);
        assert!(dest.count + n <= dest.max_size, "shift overflows destination");
        debug_assert_eq!(self.record_len, dest.record_len);
        if n == 0 {
            return;
        }

        let rl = self.record_len;
        let at = dest.count * rl;
        dest.data[at..at + n * rl].copy_from_slice(&self.data[..n * rl]);
        dest.count += n;

        self.data.copy_within(n * rl..self.count * rl, 0);
        self.count -= n;
        self.clear_tail();
    }

    /// Moves records from `at` upward into a new buffer of the same shape.
    pub fn split_off(&mut self, at: usize) -> RecordBuffer {
        assert!(at <= self.count);
        let mut upper = RecordBuffer::new(self.max_size, self.record_len, self.key_len);
        self.shift_right(self.count - at, &mut upper);
        upper
    }

    /// Keeps `ceil(count / 2)` records and moves the rest to a new buffer.
    pub fn split(&mut self) -> RecordBuffer {
        let keep = self.count.div_ceil(2);
        self.split_off(keep)
    }

    /// Appends every record of `other`, whose keys must all be higher.
    pub fn merge(&mut self, other: &RecordBuffer) {
        assert!(
            self.count + other.count <= self.max_size,
            "merge of {} + {} exceeds {}",
            self.count,
            other.count,
            self.max_size
        );
        debug_assert!(
            self.is_empty() || other.is_empty() || self.key_at(self.count - 1) < other.key_at(0)
        );
        let rl = self.record_len;
        let at = self.count * rl;
        self.data[at..at + other.count * rl].copy_from_slice(&other.data[..other.count * rl]);
        self.count += other.count;
    }

    /// Iterates the records in key order.
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.count).map(move |i| self.get(i))
    }

    /// The full encoded region, unused slots zeroed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn clear_tail(&mut self) {
        let from = self.count * self.record_len;
        self.data[from..].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(k: u8) -> Record {
        Record::from_key(&[k])
    }

    fn buffer_of(keys: &[u8], max: usize) -> RecordBuffer {
        let mut buf = RecordBuffer::new(max, 1, 1);
        for &k in keys {
            buf.add(&rec(k));
        }
        buf
    }

    fn keys(buf: &RecordBuffer) -> Vec<u8> {
        buf.iter().map(|r| r.key()[0]).collect()
    }

    #[test]
    fn test_add_keeps_order() {
        let buf = buffer_of(&[30, 10, 20, 5], 6);
        assert_eq!(keys(&buf), vec![5, 10, 20, 30]);
        assert_eq!(buf.low(), Some(rec(5)));
        assert_eq!(buf.high(), Some(rec(30)));
    }

    #[test]
    fn test_find() {
        let buf = buffer_of(&[10, 20, 30], 6);
        assert_eq!(buf.find(&[10]), Ok(0));
        assert_eq!(buf.find(&[30]), Ok(2));
        assert_eq!(buf.find(&[5]), Err(0));
        assert_eq!(buf.find(&[25]), Err(2));
        assert_eq!(buf.find(&[99]), Err(3));

        let empty = RecordBuffer::new(4, 1, 1);
        assert_eq!(empty.find(&[1]), Err(0));
        assert_eq!(empty.low(), None);
    }

    #[test]
    #[should_panic(expected = "full buffer")]
    fn test_add_to_full_panics() {
        let mut buf = buffer_of(&[1, 2], 2);
        buf.add(&rec(3));
    }

    #[test]
    #[should_panic(expected = "duplicate key")]
    fn test_add_duplicate_panics() {
        let mut buf = buffer_of(&[1, 2], 4);
        buf.add(&rec(2));
    }

    #[test]
    fn test_remove() {
        let mut buf = buffer_of(&[1, 2, 3, 4], 4);
        assert_eq!(buf.remove(1), rec(2));
        assert_eq!(keys(&buf), vec![1, 3, 4]);
        // Freed slot is zeroed
        assert_eq!(buf.as_bytes()[3], 0);
    }

    #[test]
    fn test_values_travel_with_keys() {
        let mut buf = RecordBuffer::new(4, 3, 1);
        buf.add(&Record::new(vec![2u8, 0xB, 0xB], 1));
        buf.add(&Record::new(vec![1u8, 0xA, 0xA], 1));
        assert_eq!(buf.get(0).value(), &[0xA, 0xA]);
        assert_eq!(buf.get(1).value(), &[0xB, 0xB]);
    }

    #[test]
    fn test_shift_right() {
        let mut left = buffer_of(&[1, 2, 3, 4], 6);
        let mut right = buffer_of(&[8, 9], 6);
        left.shift_right(2, &mut right);
        assert_eq!(keys(&left), vec![1, 2]);
        assert_eq!(keys(&right), vec![3, 4, 8, 9]);
    }

    #[test]
    fn test_shift_left() {
        let mut left = buffer_of(&[1, 2], 6);
        let mut right = buffer_of(&[7, 8, 9], 6);
        right.shift_left(2, &mut left);
        assert_eq!(keys(&left), vec![1, 2, 7, 8]);
        assert_eq!(keys(&right), vec![9]);
    }

    #[test]
    fn test_split_keeps_ceil_half() {
        let mut buf = buffer_of(&[0x30, 0x31, 0x32, 0x33, 0x34, 0x35], 6);
        let upper = buf.split();
        assert_eq!(buf.count(), 3);
        assert_eq!(upper.count(), 3);

        let mut odd = buffer_of(&[1, 2, 3, 4, 5], 6);
        let upper = odd.split();
        assert_eq!(keys(&odd), vec![1, 2, 3]);
        assert_eq!(keys(&upper), vec![4, 5]);
    }

    #[test]
    fn test_merge() {
        let mut low = buffer_of(&[10, 20], 6);
        let high = buffer_of(&[99], 6);
        low.merge(&high);
        assert_eq!(keys(&low), vec![10, 20, 99]);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_merge_overflow_panics() {
        let mut low = buffer_of(&[1, 2], 3);
        let high = buffer_of(&[5, 6], 3);
        low.merge(&high);
    }

    #[test]
    fn test_from_region() {
        let buf = buffer_of(&[3, 4, 5], 4);
        let copy = RecordBuffer::from_region(buf.as_bytes(), 3, 4, 1, 1);
        assert_eq!(copy, buf);
    }
}
