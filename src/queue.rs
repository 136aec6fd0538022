use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug)]
struct QueueInner<T> {
    capacity: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    block_count: AtomicU64,
}

/// A fixed-capacity blocking FIFO shared by any number of producers and consumers
///
/// Cloning yields another handle to the same queue.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create an empty, open queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PipelineError::invalid("queue capacity must be positive"));
        }

        Ok(Self {
            inner: Arc::new(QueueInner {
                capacity,
                state: Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                block_count: AtomicU64::new(0),
            }),
        })
    }

    /// Append an item, blocking while the queue is full
    ///
    /// Fails with [`PipelineError::Closed`] if the queue is closed before or
    /// while waiting for space. The item is dropped in that case; use
    /// [`enqueue_or_return`](Self::enqueue_or_return) to keep it.
    pub fn enqueue(&self, item: T) -> Result<()> {
        self.enqueue_or_return(item).map_err(|_| PipelineError::Closed)
    }

    /// Like [`enqueue`](Self::enqueue), but a closed queue hands the item back
    pub fn enqueue_or_return(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.inner.state.lock();
        let mut blocked = false;

        while state.items.len() == self.inner.capacity && !state.closed {
            if !blocked {
                self.inner.block_count.fetch_add(1, Ordering::Relaxed);
                blocked = true;
            }
            self.inner.not_full.wait(&mut state);
        }

        if state.closed {
            return Err(item);
        }

        state.items.push_back(item);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Remove the front item, blocking while the queue is empty and open
    ///
    /// Returns `None` once the queue is closed and fully drained. That end of
    /// stream is permanent and never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let mut state = self.inner.state.lock();

        while state.items.is_empty() && !state.closed {
            self.inner.not_empty.wait(&mut state);
        }

        let item = state.items.pop_front()?;
        self.inner.not_full.notify_one();
        Some(item)
    }

    /// Mark the queue closed and wake every blocked producer and consumer
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    /// Remove and return everything currently buffered
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.inner.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        if !drained.is_empty() {
            self.inner.not_full.notify_all();
        }
        drained
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current number of buffered items
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the capacity of the queue
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Get the utilization of the queue as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        ((self.len() * 100) / self.capacity()).min(100) as u32
    }

    /// Number of enqueues that had to wait for space
    pub fn block_count(&self) -> u64 {
        self.inner.block_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_queue_fifo() {
        let queue = BoundedQueue::new(10).unwrap();
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        let out: Vec<_> = (0..5).map(|_| queue.dequeue().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = BoundedQueue::<u8>::new(0);
        assert!(matches!(result, Err(PipelineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_queue_utilization() {
        let queue = BoundedQueue::new(10).unwrap();
        for i in 0..5 {
            queue.enqueue(i).unwrap();
        }
        assert_eq!(queue.utilization(), 50);
        assert_eq!(queue.capacity(), 10);
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let queue = BoundedQueue::new(2).unwrap();
        queue.enqueue(1).unwrap();
        queue.close();
        queue.close();
        assert!(matches!(queue.enqueue(2), Err(PipelineError::Closed)));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_full_queue_blocks_until_dequeue() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue(), Some(1));

        producer.join().unwrap().unwrap();
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.block_count(), 1);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue(1).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(2))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert!(matches!(producer.join().unwrap(), Err(PipelineError::Closed)));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_closed_queue_returns_item() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.enqueue("kept").unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue_or_return("stranded"))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err("stranded"));
        assert_eq!(queue.enqueue_or_return("late"), Err("late"));
        assert_eq!(queue.drain(), vec!["kept"]);
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue: BoundedQueue<u32> = BoundedQueue::new(4).unwrap();
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || queue.dequeue())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_drain_returns_buffered_items() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.enqueue('a').unwrap();
        queue.enqueue('b').unwrap();
        queue.close();
        assert_eq!(queue.drain(), vec!['a', 'b']);
        assert_eq!(queue.dequeue(), None);
    }
}
