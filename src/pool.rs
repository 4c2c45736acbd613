//! Reservoir of pre-allocated frame slots for the outbound UDP path.

use crate::frame::TunnelFrame;

/// Slots allocated up front when a pool is created for a worker.
pub const FRAME_POOL_SIZE: usize = 16;

/// A reservoir of idle frame slots.
///
/// Slots move between the pool and the aggregation buffers by value; the
/// pool tracks how many slots exist in total so that
/// `idle + pending + in-flight == total_allocated` holds at every quiescent
/// point. The pool only ever grows; slots live until [`FramePool::clear`].
#[derive(Debug, Default)]
pub struct FramePool {
    slots: Vec<TunnelFrame>,
    total_allocated: usize,
}

impl FramePool {
    /// Create a pool holding `n` idle slots.
    pub fn with_initial(n: usize) -> Self {
        let mut pool = Self::default();
        pool.grow(n);
        pool
    }

    /// Move the head slot out of the pool, or `None` when it has run dry.
    pub fn take(&mut self) -> Option<TunnelFrame> {
        self.slots.pop()
    }

    /// Splice a drained sequence of slots back into the pool.
    pub fn put_back<I: IntoIterator<Item = TunnelFrame>>(&mut self, slots: I) {
        self.slots.extend(slots);
    }

    /// Allocate `n` fresh slots.
    pub fn grow(&mut self, n: usize) {
        self.slots
            .extend(std::iter::repeat_with(TunnelFrame::default).take(n));
        self.total_allocated += n;
    }

    /// Grow by the current total allocation (doubling), returning the new
    /// total. A pool that has never been grown starts at
    /// [`FRAME_POOL_SIZE`].
    pub fn grow_double(&mut self) -> usize {
        self.grow(self.total_allocated.max(FRAME_POOL_SIZE));
        self.total_allocated
    }

    /// Destroy every slot and reset the allocation counter.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.slots.shrink_to_fit();
        self.total_allocated = 0;
    }

    /// Idle slots currently in the pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no idle slot is available.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots allocated over the pool's lifetime.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conserves_slots_across_take_and_put_back() {
        let mut pool = FramePool::with_initial(FRAME_POOL_SIZE);
        assert_eq!(pool.len(), FRAME_POOL_SIZE);
        assert_eq!(pool.total_allocated(), FRAME_POOL_SIZE);

        let mut pending = Vec::new();
        for _ in 0..5 {
            pending.push(pool.take().unwrap());
        }
        assert_eq!(pool.len() + pending.len(), pool.total_allocated());

        pool.put_back(pending.drain(..));
        assert_eq!(pool.len(), pool.total_allocated());
    }

    #[test]
    fn doubles_on_underflow() {
        let mut pool = FramePool::with_initial(4);
        let taken: Vec<_> = std::iter::from_fn(|| pool.take()).collect();
        assert_eq!(taken.len(), 4);
        assert!(pool.is_empty());

        assert_eq!(pool.grow_double(), 8);
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.grow_double(), 16);
        assert_eq!(pool.len(), 12);
    }

    #[test]
    fn empty_pool_doubles_from_the_initial_size() {
        let mut pool = FramePool::default();
        assert_eq!(pool.grow_double(), FRAME_POOL_SIZE);
    }

    #[test]
    fn clear_resets_the_counters() {
        let mut pool = FramePool::with_initial(FRAME_POOL_SIZE);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.total_allocated(), 0);
    }
}
