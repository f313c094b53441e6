use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::{Mutex, MutexGuard};

/// Mutex-guarded FIFO of pending work items.
///
/// All access goes through a [`WorkQueueGuard`] that holds the lock for its lifetime. The front
/// item can be inspected and mutated through the guard, then either left in place or popped;
/// dropping the guard releases the lock in both cases.
///
/// ```rust
/// use mavlane::sync::utils::WorkQueue;
///
/// let queue = WorkQueue::new();
/// queue.push_back("first");
/// queue.push_back("second");
///
/// {
///     let mut guard = queue.guard();
///     assert_eq!(guard.front_mut(), Some(&mut "first"));
///     guard.pop_front();
/// }
///
/// assert_eq!(queue.len(), 1);
/// ```
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<T>>,
}

/// Exclusive access to a [`WorkQueue`].
pub struct WorkQueueGuard<'a, T> {
    items: MutexGuard<'a, VecDeque<T>>,
}

impl<T> WorkQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Locks the queue.
    pub fn guard(&self) -> WorkQueueGuard<'_, T> {
        WorkQueueGuard {
            items: self.items.lock().unwrap_or_else(|err| err.into_inner()),
        }
    }

    /// Appends an item.
    pub fn push_back(&self, item: T) {
        self.guard().push_back(item)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

impl<T> WorkQueueGuard<'_, T> {
    /// Front item.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Mutable front item.
    pub fn front_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }

    /// Removes and returns the front item.
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Appends an item.
    pub fn push_back(&mut self, item: T) {
        self.items.push_back(item)
    }

    /// Inserts an item at `index`, or at the back if `index` is past the end.
    pub fn insert(&mut self, index: usize, item: T) {
        let index = index.min(self.items.len());
        self.items.insert(index, item)
    }

    /// Index of the first item matching the predicate.
    pub fn position<P: FnMut(&T) -> bool>(&self, predicate: P) -> Option<usize> {
        self.items.iter().position(predicate)
    }

    /// Removes and returns every item matching the predicate, preserving the order of the rest.
    pub fn drain_matching<P: FnMut(&T) -> bool>(&mut self, mut predicate: P) -> Vec<T> {
        let mut drained = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if predicate(&item) {
                drained.push(item);
            } else {
                kept.push_back(item);
            }
        }
        *self.items = kept;
        drained
    }

    /// Iterates over queued items, front first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn front_is_mutated_in_place() {
        let queue = WorkQueue::new();
        queue.push_back(1);
        queue.push_back(2);

        if let Some(front) = queue.guard().front_mut() {
            *front += 10;
        }

        let mut guard = queue.guard();
        assert_eq!(guard.pop_front(), Some(11));
        assert_eq!(guard.pop_front(), Some(2));
        assert_eq!(guard.pop_front(), None);
    }

    #[test]
    fn drain_matching_keeps_order() {
        let queue = WorkQueue::new();
        for item in 0..6 {
            queue.push_back(item);
        }

        let drained = queue.guard().drain_matching(|item| item % 2 == 0);
        assert_eq!(drained, vec![0, 2, 4]);
        assert_eq!(queue.guard().iter().copied().collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn insert_before_position() {
        let queue = WorkQueue::new();
        queue.push_back("get-a");
        queue.push_back("get-b");

        let mut guard = queue.guard();
        let index = guard.position(|item| *item == "get-b").unwrap();
        guard.insert(index, "set");
        guard.insert(100, "tail");

        assert_eq!(
            guard.iter().copied().collect::<Vec<_>>(),
            vec!["get-a", "set", "get-b", "tail"]
        );
    }

    #[test]
    fn guard_serialises_concurrent_access() {
        let queue = Arc::new(WorkQueue::new());
        queue.push_back(0usize);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut guard = queue.guard();
                        if let Some(front) = guard.front_mut() {
                            *front += 1;
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.guard().front(), Some(&8000));
    }
}
