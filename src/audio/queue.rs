use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::AudioFrame;

/// Bounded hand-off between the capture and analysis lanes.
///
/// `push` never blocks the producer: when the queue is full the oldest
/// queued frame is evicted to make room. Clones share the same queue.
#[derive(Clone)]
pub struct ProcessingQueue {
    sender: Sender<AudioFrame>,
    receiver: Receiver<AudioFrame>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl ProcessingQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue a frame, evicting the oldest one if the queue is full.
    /// Returns the number of frames evicted to make room.
    pub fn push(&self, frame: AudioFrame) -> usize {
        let mut frame = frame;
        let mut evicted = 0;
        loop {
            match self.sender.try_send(frame) {
                Ok(()) => break,
                Err(TrySendError::Full(rejected)) => {
                    if self.receiver.try_recv().is_ok() {
                        evicted += 1;
                    }
                    frame = rejected;
                }
                // both ends live in `self`, so this cannot happen
                Err(TrySendError::Disconnected(_)) => break,
            }
        }

        if evicted > 0 {
            let total = self.dropped.fetch_add(evicted as u64, Ordering::Relaxed) + evicted as u64;
            debug!("Processing queue full, dropped {} frame(s) ({} total)", evicted, total);
        }
        evicted
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.receiver.try_recv().ok()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard every queued frame, returning how many were discarded.
    pub fn drain(&self) -> usize {
        self.receiver.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(ts: f64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 4], ts)
    }

    #[test]
    fn test_fifo_order() {
        let queue = ProcessingQueue::new(4);
        for i in 0..3 {
            assert_eq!(queue.push(frame(i as f64)), 0);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_pop().unwrap().timestamp_ms, 0.0);
        assert_eq!(queue.try_pop().unwrap().timestamp_ms, 1.0);
        assert_eq!(queue.try_pop().unwrap().timestamp_ms, 2.0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = ProcessingQueue::new(3);
        for i in 0..5 {
            queue.push(frame(i as f64));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 2);

        let remaining: Vec<f64> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| f.timestamp_ms)
            .collect();
        assert_eq!(remaining, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_drain_discards_everything() {
        let queue = ProcessingQueue::new(8);
        for i in 0..5 {
            queue.push(frame(i as f64));
        }
        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
        assert!(queue.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_push_never_blocks_with_slow_consumer() {
        let queue = ProcessingQueue::new(10);
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    queue.push(frame(i as f64));
                }
            })
        };
        producer.join().unwrap();

        assert_eq!(queue.len(), 10);
        assert_eq!(queue.dropped(), 990);
        assert_eq!(queue.try_pop().unwrap().timestamp_ms, 990.0);
    }
}
