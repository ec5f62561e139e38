use std::{cell::UnsafeCell, fmt, ptr::NonNull};

use crate::{message::Message, notifier::CriticalSection, sync::Semaphore};

/// Non-blocking enqueue side of a listener's queue, with the capacity erased
/// so listeners of different sizes can share one subscriber list.
pub(crate) trait Post<T> {
    fn post(&self, msg: NonNull<Message<T>>, cs: &CriticalSection) -> bool;
}

/// Fixed-capacity FIFO of message handles.
///
/// The ring is guarded by the notifier's critical section. `count` mirrors
/// the number of queued handles so the consumer can sleep outside of it.
pub(crate) struct BoundedQueue<T, const N: usize> {
    count: Semaphore,
    ring: UnsafeCell<Ring<T, N>>,
}

/// `write` and `read` always stay below `N`.
struct Ring<T, const N: usize> {
    write: usize,
    read: usize,
    len: usize,
    buffer: [Option<NonNull<Message<T>>>; N],
}

const fn advance<const N: usize>(id: usize) -> usize {
    if id + 1 == N {
        0
    } else {
        id + 1
    }
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub(crate) fn new() -> anyhow::Result<Self> {
        const { assert!(N > 0, "queue capacity must be positive") };
        Ok(Self {
            count: Semaphore::new(0)?,
            ring: UnsafeCell::new(Ring {
                write: 0,
                read: 0,
                len: 0,
                buffer: [None; N],
            }),
        })
    }

    /// Blocks until at least one handle is queued and claims it. The claimed
    /// handle is then taken with [`Self::pop`].
    pub(crate) fn wait(&self) {
        self.count.wait();
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.count.try_wait()
    }

    /// Removes the oldest handle. Must follow a successful claim.
    pub(crate) fn pop(&self, _cs: &CriticalSection) -> Option<NonNull<Message<T>>> {
        let ring = unsafe { &mut *self.ring.get() };
        if ring.len == 0 {
            return None;
        }

        let item = ring.buffer[ring.read].take();
        ring.read = advance::<N>(ring.read);
        ring.len -= 1;
        item
    }

    pub(crate) fn len(&self, _cs: &CriticalSection) -> usize {
        unsafe { (*self.ring.get()).len }
    }

    /// Forgets every queued handle. Needs exclusive access, so it can only
    /// run before the queue is linked into a notifier.
    pub(crate) fn clear(&mut self) {
        while self.count.try_wait() {}
        let ring = self.ring.get_mut();
        ring.write = 0;
        ring.read = 0;
        ring.len = 0;
        ring.buffer = [None; N];
    }

    #[cfg(test)]
    fn start_at(&mut self, id: usize) {
        let ring = self.ring.get_mut();
        ring.write = id;
        ring.read = id;
    }
}

impl<T, const N: usize> Post<T> for BoundedQueue<T, N> {
    fn post(&self, msg: NonNull<Message<T>>, _cs: &CriticalSection) -> bool {
        let ring = unsafe { &mut *self.ring.get() };
        if ring.len == N {
            return false;
        }

        ring.buffer[ring.write] = Some(msg);
        ring.write = advance::<N>(ring.write);
        ring.len += 1;

        self.count.post();
        true
    }
}

impl<T, const N: usize> fmt::Debug for BoundedQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}

unsafe impl<T: Send + Sync, const N: usize> Send for BoundedQueue<T, N> {}
unsafe impl<T: Send + Sync, const N: usize> Sync for BoundedQueue<T, N> {}
