//! Lock-free queue of cross-thread completions.
//!
//! Producers push onto an intrusive atomic stack. The loop thread detaches
//! the whole stack with a single swap and reverses it, so completions run
//! in the order they were posted.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// Multi-producer, single-consumer completion queue.
pub(crate) struct CompletionQueue<T> {
    head: AtomicPtr<Node<T>>,
}

// SAFETY: values are moved in by producers and out by the single consumer;
// nodes are only reachable through `head`.
unsafe impl<T: Send> Send for CompletionQueue<T> {}
unsafe impl<T: Send> Sync for CompletionQueue<T> {}

impl<T> CompletionQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Pushes a value. Callable from any thread, never blocks.
    pub(crate) fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `node` is not shared until the exchange below succeeds.
            unsafe { (*node).next = head };

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches every queued value, oldest first.
    pub(crate) fn take_all(&self) -> Vec<T> {
        let mut head = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut values = Vec::new();

        while !head.is_null() {
            // SAFETY: the swap above made this thread the sole owner of the chain.
            let node = unsafe { Box::from_raw(head) };
            head = node.next;
            values.push(node.value);
        }

        values.reverse();
        values
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Drop for CompletionQueue<T> {
    fn drop(&mut self) {
        drop(self.take_all());
    }
}
