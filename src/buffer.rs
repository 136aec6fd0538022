use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// An unbounded FIFO buffer guarded by a single lock
///
/// Used for the lock-step handoff between stages. Every take-and-remove runs
/// inside one critical section, so an appender never observes a half-removed
/// batch.
#[derive(Debug)]
pub struct SharedBuffer<T> {
    items: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Clone for SharedBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> SharedBuffer<T> {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Append one item at the back
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    /// Append a batch at the back, preserving its order
    pub fn extend<I>(&self, batch: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.items.lock().extend(batch);
    }

    /// Remove and return up to `n` items from the front
    ///
    /// Takes whatever is available when fewer than `n` items are buffered.
    pub fn drain_up_to(&self, n: usize) -> Vec<T> {
        let mut items = self.items.lock();
        let take = n.min(items.len());
        items.drain(..take).collect()
    }

    /// Remove and return every buffered item
    pub fn drain_all(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Get the current number of buffered items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T: Clone> SharedBuffer<T> {
    /// Copy of the buffered items, front first
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }
}

impl<T> Default for SharedBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A running reduction value shared between the stage that folds into it and
/// the stages that observe it
#[derive(Debug)]
pub struct Accumulator<A> {
    value: Arc<Mutex<A>>,
}

impl<A> Clone for Accumulator<A> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<A> Accumulator<A> {
    pub fn new(initial: A) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
        }
    }

    /// Mutate the value under the lock
    pub fn update<R>(&self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.value.lock())
    }
}

impl<A: Clone> Accumulator<A> {
    /// Copy of the current value
    pub fn get(&self) -> A {
        self.value.lock().clone()
    }
}

impl<A: Default> Default for Accumulator<A> {
    fn default() -> Self {
        Self::new(A::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_drain_up_to_takes_available() {
        let buffer = SharedBuffer::new();
        buffer.extend([1, 2, 3]);
        assert_eq!(buffer.drain_up_to(5), vec![1, 2, 3]);
        assert!(buffer.is_empty());
        assert!(buffer.drain_up_to(5).is_empty());
    }

    #[test]
    fn test_drain_up_to_keeps_rest_in_order() {
        let buffer = SharedBuffer::new();
        buffer.extend(0..10);
        assert_eq!(buffer.drain_up_to(4), vec![0, 1, 2, 3]);
        assert_eq!(buffer.snapshot(), vec![4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_concurrent_append_and_drain_conserves_items() {
        let buffer = SharedBuffer::new();
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        buffer.push(w * 1000 + i);
                    }
                })
            })
            .collect();

        let reader = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut taken = Vec::new();
                for _ in 0..500 {
                    taken.extend(buffer.drain_up_to(7));
                }
                taken
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        let mut all = reader.join().unwrap();
        all.extend(buffer.drain_all());
        all.sort_unstable();
        assert_eq!(all, (0..4000).collect::<Vec<_>>());
    }

    #[test]
    fn test_accumulator_update() {
        let acc = Accumulator::new(0i64);
        let observer = acc.clone();
        acc.update(|v| *v += 42);
        assert_eq!(observer.get(), 42);
    }
}
