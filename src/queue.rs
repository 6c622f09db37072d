//! First-in-first-out queue.
//!
//! Used as the id cache of the sequence allocator and as the ordered log of
//! operations in a transaction batch.

use std::collections::VecDeque;

/// An unbounded FIFO container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue<T> {
    items: VecDeque<T>,
}

impl<T> Queue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Create an empty queue with room for `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an item at the back.
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the oldest item, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Inspect the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn size(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in dequeue order without consuming.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Extend<T> for Queue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

impl<T> FromIterator<T> for Queue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> IntoIterator for Queue<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Queue<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_enqueue_ten_reports_size_ten() {
        let mut queue = Queue::new();
        for index in 0..10 {
            queue.enqueue(index);
        }
        assert_eq!(queue.size(), 10);
    }

    #[test]
    fn test_dequeue_order_is_fifo() {
        let mut queue: Queue<i64> = (1..=5).collect();
        assert_eq!(queue.peek(), Some(&1));
        let drained: Vec<i64> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5]);
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_iter_does_not_consume() {
        let queue: Queue<&str> = ["a", "b"].into_iter().collect();
        let seen: Vec<&&str> = queue.iter().collect();
        assert_eq!(seen, vec![&"a", &"b"]);
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn test_random_operations_track_size_and_order() {
        let mut rng = rand::thread_rng();
        let mut queue = Queue::new();
        let mut next = 0u32;
        let mut expected_front = 0u32;
        let mut enqueued = 0usize;
        let mut dequeued = 0usize;

        for _ in 0..1000 {
            if rng.gen_bool(0.6) {
                queue.enqueue(next);
                next += 1;
                enqueued += 1;
            } else if let Some(item) = queue.dequeue() {
                assert_eq!(item, expected_front);
                expected_front += 1;
                dequeued += 1;
            }
            assert_eq!(queue.size(), enqueued - dequeued);
        }
    }
}
