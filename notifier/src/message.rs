use std::{cell::UnsafeCell, fmt, ptr::NonNull};

use crate::{notifier::CriticalSection, queue::Post};

/// One pool block: a payload plus the count of listeners still holding it.
///
/// A block is in exactly one of three states: free in the pool, allocated
/// but not yet broadcast, or in flight with `ref_count` listeners. The count
/// and the free-list link are only touched under the notifier's critical
/// section, which every accessor demands as a `&CriticalSection`.
pub(crate) struct Message<T> {
    ref_count: UnsafeCell<u16>,
    next_free: UnsafeCell<Option<NonNull<Message<T>>>>,
    payload: UnsafeCell<T>,
}

impl<T> Message<T> {
    pub(crate) fn new(payload: T) -> Self {
        Self {
            ref_count: UnsafeCell::new(0),
            next_free: UnsafeCell::new(None),
            payload: UnsafeCell::new(payload),
        }
    }

    /// Offers this message to `queue` without blocking. Counts a reference
    /// only if the queue had room.
    pub(crate) fn send(&self, queue: &dyn Post<T>, cs: &CriticalSection) -> bool {
        if queue.post(NonNull::from(self), cs) {
            unsafe { *self.ref_count.get() += 1 };
            true
        } else {
            false
        }
    }

    /// Drops one reference. Returns true once nobody holds the block anymore.
    ///
    /// Calling this on a message whose count is already zero is a caller bug;
    /// the count stays at zero instead of wrapping.
    pub(crate) fn dereference(&self, _cs: &CriticalSection) -> bool {
        let count = unsafe { &mut *self.ref_count.get() };
        debug_assert!(*count > 0, "message released more often than delivered");
        let last = *count <= 1;
        *count = count.saturating_sub(1);
        last
    }

    pub(crate) fn reset(&self, _cs: &CriticalSection) {
        unsafe { *self.ref_count.get() = 0 };
    }

    pub(crate) fn ref_count(&self, _cs: &CriticalSection) -> u16 {
        unsafe { *self.ref_count.get() }
    }

    pub(crate) fn next_free(&self, _cs: &CriticalSection) -> Option<NonNull<Message<T>>> {
        unsafe { *self.next_free.get() }
    }

    pub(crate) fn set_next_free(&self, next: Option<NonNull<Message<T>>>, _cs: &CriticalSection) {
        unsafe { *self.next_free.get() = next };
    }

    /// # Safety
    /// No `&mut T` to this payload may exist for the lifetime of the result.
    pub(crate) unsafe fn payload(&self) -> &T {
        &*self.payload.get()
    }

    /// # Safety
    /// The caller must be the block's only holder: allocated and not yet
    /// broadcast.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut T {
        &mut *self.payload.get()
    }
}

impl<T> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message").finish_non_exhaustive()
    }
}

// Count and link are guarded by the critical section. The payload is written
// only by the exclusive owner of an allocated block and read concurrently by
// listeners after the broadcast.
unsafe impl<T: Send + Sync> Sync for Message<T> {}
unsafe impl<T: Send> Send for Message<T> {}

#[cfg(test)]
mod test {
    use super::Message;
    use crate::{notifier::CriticalSection, queue::BoundedQueue};

    #[test]
    fn send_counts_only_accepted() {
        let cs = CriticalSection::assume_held();
        let queue = BoundedQueue::<u8, 1>::new().unwrap();
        let msg = Message::new(7u8);

        assert!(msg.send(&queue, &cs));
        assert_eq!(msg.ref_count(&cs), 1);

        assert!(!msg.send(&queue, &cs));
        assert_eq!(msg.ref_count(&cs), 1);
    }

    #[test]
    fn dereference_reports_last_holder() {
        let cs = CriticalSection::assume_held();
        let a = BoundedQueue::<u8, 2>::new().unwrap();
        let b = BoundedQueue::<u8, 2>::new().unwrap();
        let msg = Message::new(1u8);

        msg.send(&a, &cs);
        msg.send(&b, &cs);
        assert_eq!(msg.ref_count(&cs), 2);

        assert!(!msg.dereference(&cs));
        assert!(msg.dereference(&cs));
        assert_eq!(msg.ref_count(&cs), 0);
    }

    #[test]
    fn reset_clears_count() {
        let cs = CriticalSection::assume_held();
        let queue = BoundedQueue::<u8, 4>::new().unwrap();
        let msg = Message::new(0u8);
        msg.send(&queue, &cs);
        msg.send(&queue, &cs);

        msg.reset(&cs);
        assert_eq!(msg.ref_count(&cs), 0);
    }
}
