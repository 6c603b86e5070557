//! Lock-free SPSC ring buffers carrying `Frame`s between the cpal callback
//! thread and the session task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

use super::frame::Frame;

/// ~2 s of 100 ms frames.
const DEFAULT_CAPACITY: usize = 20;

/// Producer half — lives in the cpal audio callback thread.
pub struct FrameProducer {
    inner: ringbuf::HeapProd<Frame>,
    overflow: Arc<AtomicU64>,
}

/// Consumer half — lives in the session task.
pub struct FrameConsumer {
    inner: ringbuf::HeapCons<Frame>,
    overflow: Arc<AtomicU64>,
}

/// Create a matched producer/consumer pair. `capacity` defaults to ~2 s of
/// frames.
pub fn frame_ring(capacity: Option<usize>) -> (FrameProducer, FrameConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY);
    let rb = HeapRb::<Frame>::new(cap);
    let (prod, cons) = rb.split();
    let overflow = Arc::new(AtomicU64::new(0));
    (
        FrameProducer {
            inner: prod,
            overflow: overflow.clone(),
        },
        FrameConsumer {
            inner: cons,
            overflow,
        },
    )
}

impl FrameProducer {
    /// Push one frame. On overflow the oldest queued frame is dropped and
    /// the overflow counter is incremented.
    pub fn push(&mut self, frame: Frame) {
        if self.inner.is_full() {
            self.inner.try_pop();
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.inner.try_push(frame);
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

// Safety: cpal callbacks run on a single dedicated audio thread.
unsafe impl Send for FrameProducer {}

impl FrameConsumer {
    pub fn try_pop(&mut self) -> Option<Frame> {
        self.inner.try_pop()
    }

    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Drop every queued frame, discarding TTS reverb tails after the flush
    /// delay.
    pub fn drain_all(&mut self) {
        while self.inner.try_pop().is_some() {}
    }
}

unsafe impl Send for FrameConsumer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let (mut prod, mut cons) = frame_ring(Some(2));
        let mut a = Frame::silence();
        a.samples[0] = 1;
        let mut b = Frame::silence();
        b.samples[0] = 2;
        let mut c = Frame::silence();
        c.samples[0] = 3;

        prod.push(a);
        prod.push(b);
        prod.push(c); // overflow: drops `a`

        assert_eq!(prod.overflow_count(), 1);
        assert_eq!(cons.try_pop().unwrap().samples[0], 2);
        assert_eq!(cons.try_pop().unwrap().samples[0], 3);
        assert!(cons.try_pop().is_none());
    }

    #[test]
    fn drain_all_empties_queue() {
        let (mut prod, mut cons) = frame_ring(Some(4));
        prod.push(Frame::silence());
        prod.push(Frame::silence());
        cons.drain_all();
        assert_eq!(cons.available(), 0);
    }
}
