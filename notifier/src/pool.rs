use std::ptr::NonNull;

use crate::{message::Message, notifier::CriticalSection};

/// Intrusive free list over blocks donated by listeners. Capacity only grows
/// through [`BlockPool::load`]; nothing is ever handed back to the donors.
pub(crate) struct BlockPool<T> {
    free: Option<NonNull<Message<T>>>,
    available: usize,
    capacity: usize,
}

impl<T> BlockPool<T> {
    pub(crate) const fn new() -> Self {
        Self {
            free: None,
            available: 0,
            capacity: 0,
        }
    }

    /// # Safety
    /// Every block must stay alive, and unused by anything but this pool, for
    /// as long as the pool is used.
    pub(crate) unsafe fn load(&mut self, blocks: &[Message<T>], cs: &CriticalSection) {
        for block in blocks {
            self.free(NonNull::from(block), cs);
        }
        self.capacity += blocks.len();
    }

    pub(crate) fn alloc(&mut self, cs: &CriticalSection) -> Option<NonNull<Message<T>>> {
        let block = self.free?;
        let msg = unsafe { block.as_ref() };
        self.free = msg.next_free(cs);
        msg.set_next_free(None, cs);
        self.available -= 1;
        Some(block)
    }

    pub(crate) fn free(&mut self, block: NonNull<Message<T>>, cs: &CriticalSection) {
        unsafe { block.as_ref() }.set_next_free(self.free, cs);
        self.free = Some(block);
        self.available += 1;
    }

    pub(crate) fn available(&self) -> usize {
        self.available
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use super::BlockPool;
    use crate::{message::Message, notifier::CriticalSection};

    #[test]
    fn exhausts_and_recovers() {
        let cs = CriticalSection::assume_held();
        let blocks = [Message::new(0u64), Message::new(0), Message::new(0)];
        let mut pool = BlockPool::new();
        unsafe { pool.load(&blocks, &cs) };
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available(), 3);

        let taken: Vec<_> = (0..3).map(|_| pool.alloc(&cs).unwrap()).collect();
        assert_eq!(pool.available(), 0);
        assert!(pool.alloc(&cs).is_none());

        pool.free(taken[1], &cs);
        assert_eq!(pool.alloc(&cs), Some(taken[1]));
    }

    #[test]
    fn contributions_accumulate() {
        let cs = CriticalSection::assume_held();
        let small = [Message::new(0u8), Message::new(0)];
        let large = [Message::new(0u8), Message::new(0), Message::new(0)];
        let mut pool = BlockPool::new();
        unsafe {
            pool.load(&small, &cs);
            pool.load(&large, &cs);
        }

        assert_eq!(pool.capacity(), 5);
        let mut handed_out = 0;
        while pool.alloc(&cs).is_some() {
            handed_out += 1;
        }
        assert_eq!(handed_out, 5);
    }
}
