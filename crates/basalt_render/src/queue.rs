//! # Double-Buffered Command Queue
//!
//! Two symmetric buffers trade roles at frame boundaries. Producers append
//! envelopes to the active buffer; `swap` hands the filled buffer to the
//! render thread and installs the drained one as the new active buffer.
//!
//! ## Thread Safety
//!
//! One mutex guards the role assignment and a tri-state phase token; two
//! condvars signal the two transitions ("a buffer became drainable", "the
//! queue became idle again"). The consumer takes the queued buffer out of
//! the shared state and drains it without holding the lock, so producers
//! keep filling the other buffer in parallel.
//!
//! ## Shutdown
//!
//! Cooperative: `stop` clears the running flag and wakes the consumer,
//! which performs one final drain pass if a buffer is still queued. No
//! submitted command is ever dropped.

use basalt_core::{FitMode, FreeListAllocator};
use parking_lot::{Condvar, Mutex};

use crate::command::{CommandHeader, HEADER_SIZE};

/// One frame's worth of contiguous envelopes.
///
/// Backed by a free-list arena that, fresh or reset, hands out strictly
/// increasing contiguous offsets. `push` asserts that property so a broken
/// envelope chain is caught at write time, not decode time.
pub struct CommandBuffer {
    arena: FreeListAllocator,
    used: usize,
    count: usize,
}

impl CommandBuffer {
    /// Creates a buffer with an arena of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            arena: FreeListAllocator::new(capacity, FitMode::First),
            used: 0,
            count: 0,
        }
    }

    /// Appends one envelope: the header, then each payload part in order.
    ///
    /// # Panics
    ///
    /// Panics when the arena is exhausted, when `header.size` disagrees
    /// with the payload parts, or when the arena breaks contiguity.
    pub fn push(&mut self, header: CommandHeader, payload: &[&[u8]]) {
        let payload_len: usize = payload.iter().map(|part| part.len()).sum();
        assert!(
            header.size as usize == HEADER_SIZE + payload_len,
            "header size {} does not cover a {payload_len}-byte payload",
            header.size
        );

        let total = header.size as usize;
        let offset = self
            .arena
            .allocate(total)
            .expect("command arena exhausted");
        assert!(offset == self.used, "envelope chain broken");

        self.arena.write(offset, bytemuck::bytes_of(&header));
        let mut cursor = offset + HEADER_SIZE;
        for part in payload {
            self.arena.write(cursor, part);
            cursor += part.len();
        }

        self.used = offset + FreeListAllocator::align(total);
        self.count += 1;
    }

    /// Number of envelopes in the buffer.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the buffer holds no envelopes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates the envelopes in submission order.
    #[must_use]
    pub fn envelopes(&self) -> Envelopes<'_> {
        Envelopes {
            buffer: self,
            cursor: 0,
        }
    }

    /// Forgets every envelope and recycles the arena for the next frame.
    pub fn reset(&mut self) {
        self.arena.reset();
        self.used = 0;
        self.count = 0;
    }
}

/// Iterator over `(header, payload)` pairs of one buffer.
pub struct Envelopes<'a> {
    buffer: &'a CommandBuffer,
    cursor: usize,
}

impl<'a> Iterator for Envelopes<'a> {
    type Item = (CommandHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.buffer.used {
            return None;
        }

        let header: CommandHeader =
            bytemuck::pod_read_unaligned(self.buffer.arena.read(self.cursor, HEADER_SIZE));
        let payload = self
            .buffer
            .arena
            .read(self.cursor + HEADER_SIZE, header.payload_len());

        self.cursor += FreeListAllocator::align(header.size as usize);
        Some((header, payload))
    }
}

/// Where the queue stands in the frame cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Both buffers are in producer hands; nothing queued.
    Idle,
    /// One buffer is filled and waiting for the consumer.
    Queued,
    /// The consumer is walking the queued buffer.
    Draining,
}

struct QueueInner {
    write: CommandBuffer,
    queued: Option<CommandBuffer>,
    spare: Option<CommandBuffer>,
    phase: Phase,
    running: bool,
}

/// The shared queue both sides hold through an `Arc`.
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    /// Signaled when a buffer becomes drainable or the queue stops.
    drainable: Condvar,
    /// Signaled when the drained buffer is back and the phase is idle.
    idle: Condvar,
}

impl CommandQueue {
    /// Creates a queue with two buffers of `arena_size` bytes each.
    #[must_use]
    pub fn new(arena_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                write: CommandBuffer::new(arena_size),
                queued: None,
                spare: Some(CommandBuffer::new(arena_size)),
                phase: Phase::Idle,
                running: true,
            }),
            drainable: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Appends one envelope to the active buffer. Producer side.
    pub fn push(&self, header: CommandHeader, payload: &[&[u8]]) {
        self.inner.lock().write.push(header, payload);
    }

    /// Number of envelopes in the active buffer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().write.len()
    }

    /// Flips buffer roles at a frame boundary. Producer side.
    ///
    /// Blocks until the consumer has returned the previously queued buffer
    /// (backpressure), then queues the active buffer, installs the drained
    /// one as active, and wakes the consumer.
    pub fn swap(&self) {
        let mut inner = self.inner.lock();
        while inner.phase != Phase::Idle {
            self.idle.wait(&mut inner);
        }

        let spare = inner.spare.take().expect("idle queue must hold a spare");
        let filled = core::mem::replace(&mut inner.write, spare);
        inner.queued = Some(filled);
        inner.phase = Phase::Queued;

        drop(inner);
        self.drainable.notify_one();
    }

    /// Blocks until no buffer is queued or draining. Producer side.
    pub fn sync(&self) {
        let mut inner = self.inner.lock();
        while inner.phase != Phase::Idle {
            self.idle.wait(&mut inner);
        }
    }

    /// Waits for a drainable buffer and takes it. Consumer side.
    ///
    /// Returns `None` once the queue has stopped and nothing is left to
    /// drain; a buffer queued before `stop` is still handed out first.
    #[must_use]
    pub fn next_drain(&self) -> Option<CommandBuffer> {
        let mut inner = self.inner.lock();
        while inner.phase != Phase::Queued {
            if !inner.running {
                return None;
            }
            self.drainable.wait(&mut inner);
        }

        inner.phase = Phase::Draining;
        Some(inner.queued.take().expect("queued phase holds a buffer"))
    }

    /// Returns a drained buffer and reopens the queue. Consumer side.
    pub fn finish_drain(&self, mut buffer: CommandBuffer) {
        buffer.reset();

        let mut inner = self.inner.lock();
        inner.spare = Some(buffer);
        inner.phase = Phase::Idle;

        drop(inner);
        self.idle.notify_all();
    }

    /// Requests cooperative shutdown and wakes both sides.
    pub fn stop(&self) {
        self.inner.lock().running = false;
        self.drainable.notify_all();
        self.idle.notify_all();
    }

    /// Whether `stop` has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::command::RenderMessage;
    use crate::handle::Handle;

    fn clear_header(payload_len: usize) -> CommandHeader {
        CommandHeader::submit(RenderMessage::Clear, Handle::NONE, payload_len)
    }

    #[test]
    fn test_envelopes_come_back_in_submission_order() {
        let mut buffer = CommandBuffer::new(1024);

        for i in 0..5u8 {
            buffer.push(clear_header(4), &[&[i, i, i, i]]);
        }

        let payload_heads: Vec<u8> = buffer
            .envelopes()
            .map(|(_, payload)| payload[0])
            .collect();
        assert_eq!(payload_heads, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_multi_part_payload_is_contiguous() {
        let mut buffer = CommandBuffer::new(256);
        buffer.push(clear_header(6), &[b"abc", b"def"]);

        let (header, payload) = buffer.envelopes().next().unwrap();
        assert_eq!(header.payload_len(), 6);
        assert_eq!(payload, b"abcdef");
    }

    #[test]
    #[should_panic(expected = "command arena exhausted")]
    fn test_arena_exhaustion_is_fatal() {
        let mut buffer = CommandBuffer::new(32);
        buffer.push(clear_header(8), &[&[0u8; 8]]);
        buffer.push(clear_header(8), &[&[0u8; 8]]);
    }

    #[test]
    fn test_reset_recycles_buffer() {
        let mut buffer = CommandBuffer::new(64);
        buffer.push(clear_header(4), &[&[1, 2, 3, 4]]);
        buffer.reset();

        assert!(buffer.is_empty());
        buffer.push(clear_header(4), &[&[5, 6, 7, 8]]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_swap_hands_buffer_to_consumer() {
        let queue = Arc::new(CommandQueue::new(1024));

        queue.push(clear_header(0), &[]);
        queue.push(clear_header(0), &[]);

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let buffer = queue.next_drain().unwrap();
                let drained = buffer.len();
                queue.finish_drain(buffer);
                drained
            })
        };

        queue.swap();
        assert_eq!(consumer.join().unwrap(), 2);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_second_swap_waits_for_drain() {
        let queue = Arc::new(CommandQueue::new(1024));

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut frames = 0;
                while let Some(buffer) = queue.next_drain() {
                    frames += buffer.len();
                    queue.finish_drain(buffer);
                }
                frames
            })
        };

        for i in 0..10u8 {
            queue.push(clear_header(1), &[&[i]]);
            queue.swap();
        }
        queue.sync();
        queue.stop();

        assert_eq!(consumer.join().unwrap(), 10);
    }

    #[test]
    fn test_stop_drains_queued_buffer_first() {
        let queue = Arc::new(CommandQueue::new(1024));

        queue.push(clear_header(0), &[]);
        queue.swap();
        queue.stop();

        // The buffer queued before the stop is still handed out.
        let buffer = queue.next_drain().unwrap();
        assert_eq!(buffer.len(), 1);
        queue.finish_drain(buffer);

        assert!(queue.next_drain().is_none());
    }
}
