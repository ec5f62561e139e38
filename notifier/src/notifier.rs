use std::{
    fmt,
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use tracing::{debug, trace};

use crate::{
    link::{ListenerLink, SubscriberList},
    listener::Delivery,
    message::Message,
    pool::BlockPool,
    sync::{Mutex, MutexGuard},
};

/// Token proving the notifier lock is held. It only exists inside the
/// locked [`Shared`] state, so borrowing it requires a guard.
pub(crate) struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    #[cfg(test)]
    pub(crate) fn assume_held() -> Self {
        Self { _private: () }
    }
}

/// Everything the critical section protects apart from the queue rings.
pub(crate) struct Shared<T: 'static> {
    pub(crate) cs: CriticalSection,
    pub(crate) pool: BlockPool<T>,
    pub(crate) subscribers: SubscriberList<T>,
}

impl<T: 'static> Shared<T> {
    /// Drops one reference to `msg`, returning the block to the pool when it
    /// was the last one.
    pub(crate) fn release(&mut self, msg: NonNull<Message<T>>) -> bool {
        let last = unsafe { msg.as_ref() }.dereference(&self.cs);
        if last {
            self.pool.free(msg, &self.cs);
        }
        last
    }
}

// The raw block and link pointers all target listener storage that outlives
// the notifier's `'a`, and are only followed under the lock.
unsafe impl<T: Send + Sync + 'static> Send for Shared<T> {}

/// Fan-out point for one message type.
///
/// `'a` is the lifetime of every listener storage registered here; the
/// notifier cannot be used once any of them is gone.
pub struct Notifier<'a, T: 'static> {
    shared: Mutex<Shared<T>>,
    _storage: PhantomData<fn(&'a ()) -> &'a ()>,
}

impl<'a, T: Send + Sync + 'static> Notifier<'a, T> {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            shared: Mutex::new(Shared {
                cs: CriticalSection { _private: () },
                pool: BlockPool::new(),
                subscribers: SubscriberList::new(),
            })?,
            _storage: PhantomData,
        })
    }

    /// Takes a free block. `None` means every block is in flight; the
    /// producer should skip this publish.
    pub fn allocate(&self) -> Option<Draft<'_, T>> {
        let mut shared = self.lock();
        let shared = &mut *shared;
        let msg = shared.pool.alloc(&shared.cs)?;
        unsafe { msg.as_ref() }.reset(&shared.cs);
        Some(Draft {
            msg,
            shared: &self.shared,
        })
    }

    /// Offers the message to every listener in registration order and
    /// returns how many accepted it. Listeners with a full queue miss it.
    ///
    /// A message nobody accepted goes straight back to the pool.
    pub fn broadcast(&self, draft: Draft<'_, T>) -> usize {
        assert!(
            ptr::eq(draft.shared, &self.shared),
            "message allocated from another notifier"
        );
        let msg = draft.into_raw();

        let mut guard = self.lock();
        let shared = &mut *guard;
        let mut accepted = 0;
        {
            let block = unsafe { msg.as_ref() };
            for link in shared.subscribers.iter(&shared.cs) {
                let Some(queue) = link.queue() else { continue };
                if block.send(queue, &shared.cs) {
                    accepted += 1;
                }
            }
        }
        if accepted == 0 {
            shared.pool.free(msg, &shared.cs);
        }
        let listeners = shared.subscribers.len();
        drop(guard);

        if accepted == 0 {
            debug!(listeners, "broadcast reached no listener, block reclaimed");
        } else {
            trace!(accepted, listeners, "broadcast");
        }
        accepted
    }

    /// Hands a delivery back. Same as dropping it.
    pub fn release(&self, delivery: Delivery<'_, T>) {
        assert!(
            ptr::eq(delivery.shared(), &self.shared),
            "message delivered by another notifier"
        );
        drop(delivery);
    }

    /// Number of registered listeners.
    pub fn listeners(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Blocks contributed by all listeners so far.
    pub fn capacity(&self) -> usize {
        self.lock().pool.capacity()
    }

    /// Blocks currently sitting in the pool.
    pub fn free(&self) -> usize {
        self.lock().pool.available()
    }

    pub(crate) fn contribute(&self, blocks: &'a [Message<T>]) {
        let mut guard = self.lock();
        let shared = &mut *guard;
        // `'a` outlives every use of this notifier
        unsafe { shared.pool.load(blocks, &shared.cs) };
        let capacity = shared.pool.capacity();
        drop(guard);

        debug!(added = blocks.len(), capacity, "storage contributed");
    }

    pub(crate) fn listen(&self, link: &'a ListenerLink<T>) {
        let mut guard = self.lock();
        let shared = &mut *guard;
        // Every accepting listener adds one reference per broadcast.
        assert!(
            shared.subscribers.len() < u16::MAX as usize,
            "too many listeners for a 16 bit reference count"
        );
        unsafe { shared.subscribers.append(link, &shared.cs) };
        let listeners = shared.subscribers.len();
        drop(guard);

        debug!(listeners, "listener registered");
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared<T>> {
        self.shared.lock()
    }

    pub(crate) fn shared(&self) -> &Mutex<Shared<T>> {
        &self.shared
    }
}

impl<T: 'static> fmt::Debug for Notifier<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

/// An allocated block that has not been broadcast yet. The holder is its
/// only user and may fill the payload freely.
///
/// Dropping a draft returns the block to the pool.
pub struct Draft<'n, T: 'static> {
    msg: NonNull<Message<T>>,
    shared: &'n Mutex<Shared<T>>,
}

impl<T: 'static> Draft<'_, T> {
    fn into_raw(self) -> NonNull<Message<T>> {
        let msg = self.msg;
        mem::forget(self);
        msg
    }
}

impl<T: 'static> Deref for Draft<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.msg.as_ref().payload() }
    }
}

impl<T: 'static> DerefMut for Draft<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.msg.as_ref().payload_mut() }
    }
}

impl<T: 'static> Drop for Draft<'_, T> {
    fn drop(&mut self) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        shared.pool.free(self.msg, &shared.cs);
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Draft<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Draft").field(&**self).finish()
    }
}

unsafe impl<T: Send + Sync + 'static> Send for Draft<'_, T> {}
