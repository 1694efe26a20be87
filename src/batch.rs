//! Deferred notification batching.
//!
//! Every mutation entry point opens a batch; notifications raised while a
//! batch is open are queued and handed back only when the outermost batch
//! closes, so listeners never observe a half-applied mutation.

/// A reentrancy-counted queue of deferred notifications.
#[derive(Debug)]
pub struct DelayedCallbacks<E> {
    depth: usize,
    queue: Vec<E>,
}

impl<E> Default for DelayedCallbacks<E> {
    fn default() -> Self {
        Self {
            depth: 0,
            queue: Vec::new(),
        }
    }
}

impl<E> DelayedCallbacks<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a (possibly nested) batch.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Queue a notification for the end of the outermost batch.
    pub fn push(&mut self, event: E) {
        self.queue.push(event);
    }

    /// Close a batch. Returns the queued notifications when this was the
    /// outermost one, and an empty list otherwise.
    pub fn end(&mut self) -> Vec<E> {
        debug_assert!(self.depth > 0, "unbalanced DelayedCallbacks::end");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            std::mem::take(&mut self.queue)
        } else {
            Vec::new()
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_open(&self) -> bool {
        self.depth > 0
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
