// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity section ring
//!
//! Storage is allocated once and overwritten in place. One producer and one
//! consumer share the ring:
//!
//! - `input_index` lives behind the producer lock, `output_index` behind the
//!   consumer lock; neither side ever takes the other's lock on the hot path.
//! - `count` is the only field both sides mutate. It is atomic, and its
//!   Release/Acquire pairs publish slot contents from producer to consumer and
//!   slot reuse from consumer back to producer.
//! - A dequeued slot stays counted until its [`Section`] guard drops, so the
//!   producer can never overwrite bytes the consumer is still reading.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// Queue-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("section queue full")]
    Overflow,

    #[error("section of {len} bytes exceeds slot size {max}")]
    TooLarge { len: usize, max: usize },
}

struct Slot {
    len: usize,
    data: Box<[u8]>,
}

/// Fixed-capacity ring of section slots
pub struct SectionQueue {
    slots: Box<[UnsafeCell<Slot>]>,
    slot_size: usize,
    input_index: Mutex<usize>,
    output_index: Mutex<usize>,
    count: AtomicUsize,
    overflow_count: AtomicU32,
    high_water: AtomicUsize,
}

// SAFETY: slot contents are only written through `ProducerHandle::push`
// (serialised by `input_index`) into a slot that is not counted, and only
// read through a `Section` (serialised by `output_index`) from a slot that
// is counted. `count` is updated with Release after each side finishes with
// a slot and loaded with Acquire before the other side touches it, so the
// two sides never access the same slot concurrently.
unsafe impl Sync for SectionQueue {}

impl SectionQueue {
    /// Allocate `depth` slots of `slot_size` bytes; a depth of zero is raised to one
    pub fn new(depth: usize, slot_size: usize) -> Self {
        let depth = depth.max(1);
        let slots = (0..depth)
            .map(|_| {
                UnsafeCell::new(Slot {
                    len: 0,
                    data: vec![0u8; slot_size].into_boxed_slice(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            slot_size,
            input_index: Mutex::new(0),
            output_index: Mutex::new(0),
            count: AtomicUsize::new(0),
            overflow_count: AtomicU32::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Occupied slots, including one still borrowed by a live [`Section`]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Exclusive producer access for a check-then-push sequence
    pub fn producer(&self) -> ProducerHandle<'_> {
        ProducerHandle {
            queue: self,
            input_index: self.input_index.lock(),
        }
    }

    /// Copy `bytes` into the next free slot
    pub fn enqueue(&self, bytes: &[u8]) -> Result<(), QueueError> {
        self.producer().push(bytes)
    }

    /// Borrow the oldest section
    ///
    /// Returns `None` when the queue is empty, or when a previously dequeued
    /// section is still borrowed.
    pub fn dequeue(&self) -> Option<Section<'_>> {
        let output_index = self.output_index.try_lock()?;
        // Pairs with the Release in `push`
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }

        let index = *output_index;
        // SAFETY: slot `index` is counted, so the producer will not write it
        // until this guard drops and releases the count.
        let slot = unsafe { &*self.slots[index].get() };
        Some(Section {
            queue: self,
            output_index,
            bytes: &slot.data[..slot.len],
        })
    }

    /// Empty the ring without touching storage
    pub fn reset(&self) {
        let mut input_index = self.input_index.lock();
        let mut output_index = self.output_index.lock();
        *input_index = 0;
        *output_index = 0;
        self.count.store(0, Ordering::Release);
    }

    /// Overflows since the previous call; resets the counter
    pub fn take_overflow_count(&self) -> u32 {
        self.overflow_count.swap(0, Ordering::AcqRel)
    }

    /// Highest occupancy seen since the last clear
    pub fn peek_high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }

    pub fn clear_high_water(&self) {
        self.high_water.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SectionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionQueue")
            .field("capacity", &self.capacity())
            .field("slot_size", &self.slot_size)
            .field("count", &self.len())
            .field("high_water", &self.peek_high_water())
            .finish()
    }
}

/// Producer side of the ring, held for the length of one delivery
pub struct ProducerHandle<'a> {
    queue: &'a SectionQueue,
    input_index: MutexGuard<'a, usize>,
}

impl ProducerHandle<'_> {
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Count a delivery turned away because the ring was full
    pub fn record_overflow(&self) {
        self.queue.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        let queue = self.queue;
        if bytes.len() > queue.slot_size {
            return Err(QueueError::TooLarge {
                len: bytes.len(),
                max: queue.slot_size,
            });
        }
        // Pairs with the Release in `Section::drop`
        if queue.count.load(Ordering::Acquire) >= queue.capacity() {
            self.record_overflow();
            return Err(QueueError::Overflow);
        }

        let index = *self.input_index;
        // SAFETY: `index` is the slot after the last counted one, so the
        // consumer is not reading it; the producer lock makes this the only
        // writer.
        let slot = unsafe { &mut *queue.slots[index].get() };
        slot.data[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len();

        *self.input_index = (index + 1) % queue.capacity();
        let occupied = queue.count.fetch_add(1, Ordering::Release) + 1;
        queue.high_water.fetch_max(occupied, Ordering::Relaxed);
        Ok(())
    }
}

/// A dequeued section
///
/// Dereferences to the section bytes. The slot goes back to the producer
/// when the guard drops.
pub struct Section<'a> {
    queue: &'a SectionQueue,
    output_index: MutexGuard<'a, usize>,
    bytes: &'a [u8],
}

impl Section<'_> {
    /// Leading table id byte
    pub fn table_id(&self) -> u8 {
        self.bytes.first().copied().unwrap_or_default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

impl Deref for Section<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.bytes
    }
}

impl AsRef<[u8]> for Section<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}

impl std::fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section")
            .field("slot", &*self.output_index)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Drop for Section<'_> {
    fn drop(&mut self) {
        *self.output_index = (*self.output_index + 1) % self.queue.capacity();
        self.queue.count.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = SectionQueue::new(4, 16);
        queue.enqueue(&[1]).unwrap();
        queue.enqueue(&[2, 2]).unwrap();

        assert_eq!(&*queue.dequeue().unwrap(), &[1]);
        assert_eq!(&*queue.dequeue().unwrap(), &[2, 2]);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_full_queue_overflows_without_corruption() {
        let queue = SectionQueue::new(2, 8);
        queue.enqueue(b"first").unwrap();
        queue.enqueue(b"second").unwrap();

        assert_eq!(queue.enqueue(b"third"), Err(QueueError::Overflow));
        assert_eq!(queue.len(), 2);
        assert_eq!(&*queue.dequeue().unwrap(), b"first");
        assert_eq!(&*queue.dequeue().unwrap(), b"second");
    }

    #[test]
    fn test_take_overflow_count_reads_and_clears() {
        let queue = SectionQueue::new(1, 4);
        queue.enqueue(&[0]).unwrap();
        for _ in 0..3 {
            let _ = queue.enqueue(&[0]);
        }

        assert_eq!(queue.take_overflow_count(), 3);
        assert_eq!(queue.take_overflow_count(), 0);
    }

    #[test]
    fn test_high_water_tracks_peak_until_cleared() {
        let queue = SectionQueue::new(4, 4);
        queue.enqueue(&[1]).unwrap();
        queue.enqueue(&[2]).unwrap();
        queue.enqueue(&[3]).unwrap();
        drop(queue.dequeue());
        drop(queue.dequeue());

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_high_water(), 3);
        queue.clear_high_water();
        assert_eq!(queue.peek_high_water(), 0);
    }

    #[test]
    fn test_borrowed_slot_is_not_overwritten() {
        let queue = SectionQueue::new(2, 4);
        queue.enqueue(b"aaaa").unwrap();
        queue.enqueue(b"bbbb").unwrap();

        let section = queue.dequeue().unwrap();
        // Still counted while borrowed, so the ring is full
        assert_eq!(queue.enqueue(b"cccc"), Err(QueueError::Overflow));
        assert_eq!(&*section, b"aaaa");
        drop(section);

        queue.enqueue(b"cccc").unwrap();
        assert_eq!(&*queue.dequeue().unwrap(), b"bbbb");
        assert_eq!(&*queue.dequeue().unwrap(), b"cccc");
    }

    #[test]
    fn test_second_dequeue_while_borrowed_returns_none() {
        let queue = SectionQueue::new(4, 4);
        queue.enqueue(&[1]).unwrap();
        queue.enqueue(&[2]).unwrap();

        let first = queue.dequeue().unwrap();
        assert!(queue.dequeue().is_none());
        drop(first);
        assert_eq!(&*queue.dequeue().unwrap(), &[2]);
    }

    #[test]
    fn test_oversized_section_rejected() {
        let queue = SectionQueue::new(2, 4);
        assert_eq!(
            queue.enqueue(&[0; 5]),
            Err(QueueError::TooLarge { len: 5, max: 4 })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_payload_sizes_survive_unchanged() {
        let queue = SectionQueue::new(2, 4096);
        for len in [1usize, 3, 188, 1024, 4096] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            queue.enqueue(&payload).unwrap();
            assert_eq!(&*queue.dequeue().unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn test_reset_discards_retained_sections() {
        let queue = SectionQueue::new(4, 4);
        queue.enqueue(&[1]).unwrap();
        queue.enqueue(&[2]).unwrap();
        queue.reset();

        assert!(queue.is_empty());
        assert!(queue.dequeue().is_none());
        queue.enqueue(&[3]).unwrap();
        assert_eq!(&*queue.dequeue().unwrap(), &[3]);
    }

    #[test]
    fn test_zero_depth_is_raised_to_one() {
        let queue = SectionQueue::new(0, 4);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_concurrent_producer_consumer_preserves_order() {
        const TOTAL: u32 = 5_000;
        let queue = Arc::new(SectionQueue::new(8, 8));
        let producer_queue = queue.clone();

        let producer = thread::spawn(move || {
            let mut next = 0u32;
            while next < TOTAL {
                match producer_queue.enqueue(&next.to_be_bytes()) {
                    Ok(()) => next += 1,
                    Err(QueueError::Overflow) => thread::yield_now(),
                    Err(e) => panic!("unexpected {e}"),
                }
            }
        });

        let mut expected = 0u32;
        while expected < TOTAL {
            if let Some(section) = queue.dequeue() {
                let value = u32::from_be_bytes(section[..4].try_into().unwrap());
                assert_eq!(value, expected);
                assert!(queue.len() <= queue.capacity());
                expected += 1;
            } else {
                thread::yield_now();
            }
        }

        producer.join().unwrap();
        assert!(queue.is_empty());
    }
}
