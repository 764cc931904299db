//! Bounded pool of fixed-capacity receive buffers (spec §4.C).
//!
//! Acquire never blocks: an empty pool simply allocates a new buffer.
//! Release returns a buffer for reuse. Grounded in the lock-free
//! allocate-on-empty buffer pool pattern used for UDP receive batching
//! elsewhere in the corpus (the `BufferPool`/`quinn_udp` batching pattern).

use crossbeam_queue::ArrayQueue;

/// Every datagram the engine handles fits in this many bytes (spec §4.C).
pub const MAX_PACKET_BYTES: usize = 200;

pub struct PacketPool {
    free: ArrayQueue<Vec<u8>>,
}

impl PacketPool {
    pub fn new(capacity: usize) -> Self {
        PacketPool {
            free: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Acquire a zero-filled buffer of exactly `MAX_PACKET_BYTES` bytes.
    pub fn acquire(&self) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(MAX_PACKET_BYTES, 0);
                buf
            }
            None => vec![0u8; MAX_PACKET_BYTES],
        }
    }

    /// Return a buffer to the pool. Silently dropped if the pool is full.
    pub fn release(&self, buf: Vec<u8>) {
        let _ = self.free.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_allocates_when_empty() {
        let pool = PacketPool::new(4);
        let buf = pool.acquire();
        assert_eq!(buf.len(), MAX_PACKET_BYTES);
    }

    #[test]
    fn release_then_acquire_reuses_buffer() {
        let pool = PacketPool::new(4);
        let buf = pool.acquire();
        pool.release(buf);
        let buf2 = pool.acquire();
        assert_eq!(buf2.len(), MAX_PACKET_BYTES);
    }

    #[test]
    fn release_beyond_capacity_is_dropped_not_panicking() {
        let pool = PacketPool::new(1);
        pool.release(vec![0u8; MAX_PACKET_BYTES]);
        pool.release(vec![0u8; MAX_PACKET_BYTES]);
    }
}
