use std::{fmt, ops::Deref, ptr::NonNull};

use tracing::trace;

use crate::{
    link::ListenerLink,
    message::Message,
    notifier::{Notifier, Shared},
    queue::BoundedQueue,
    sync::Mutex,
};

/// Memory a listener brings along: `N` message blocks donated to the
/// notifier's pool, a queue of `N` handles and the subscription link.
///
/// Owned by the caller so it can live on a thread's stack, in a static or
/// anywhere else; the notifier never allocates.
pub struct ListenerStorage<T: 'static, const N: usize> {
    blocks: [Message<T>; N],
    queue: BoundedQueue<T, N>,
    link: ListenerLink<T>,
}

impl<T: Default + 'static, const N: usize> ListenerStorage<T, N> {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            blocks: std::array::from_fn(|_| Message::new(T::default())),
            queue: BoundedQueue::new()?,
            link: ListenerLink::new(),
        })
    }
}

impl<T: 'static, const N: usize> fmt::Debug for ListenerStorage<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerStorage")
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}

/// Consumer end of a notifier. Receives every broadcast its queue had room
/// for, in publish order.
///
/// A listener has exactly one consumer. It is neither `Copy` nor `Clone`;
/// hand a consumer thread a `&Listener` instead.
///
/// ```compile_fail
/// use notifier::{Listener, ListenerStorage, Notifier};
///
/// let mut storage = ListenerStorage::<u32, 2>::new().unwrap();
/// let notifier = Notifier::new().unwrap();
/// let listener = Listener::new(&notifier, &mut storage);
/// let second = listener;
/// assert!(listener.try_get().is_none());
/// assert!(second.try_get().is_none());
/// ```
pub struct Listener<'a, T: 'static, const N: usize> {
    source: &'a Notifier<'a, T>,
    storage: &'a ListenerStorage<T, N>,
}

impl<'a, T: Send + Sync + 'static, const N: usize> Listener<'a, T, N> {
    /// Donates the storage's blocks to `source` and subscribes to it.
    ///
    /// The queue is reset and bound before the link is published, since a
    /// concurrent broadcast may post to it as soon as it is registered.
    pub fn new(source: &'a Notifier<'a, T>, storage: &'a mut ListenerStorage<T, N>) -> Self {
        storage.queue.clear();
        storage.link.bind(&storage.queue);
        let storage: &'a ListenerStorage<T, N> = storage;

        source.contribute(&storage.blocks);
        source.listen(&storage.link);

        Self { source, storage }
    }

    /// Waits for the next message. This is the only call that blocks.
    pub fn get(&self) -> Delivery<'a, T> {
        self.storage.queue.wait();
        let msg = {
            let shared = self.source.lock();
            self.storage.queue.pop(&shared.cs)
        };
        let msg = msg.expect("queue signalled without a queued message");
        Delivery::new(msg, self.source.shared())
    }

    /// Takes the next message if one is already queued.
    pub fn try_get(&self) -> Option<Delivery<'a, T>> {
        if !self.storage.queue.try_claim() {
            return None;
        }
        let msg = {
            let shared = self.source.lock();
            self.storage.queue.pop(&shared.cs)
        };
        let msg = msg.expect("queue signalled without a queued message");
        Some(Delivery::new(msg, self.source.shared()))
    }

    pub fn release(&self, delivery: Delivery<'a, T>) {
        self.source.release(delivery);
    }

    /// Messages queued and not yet taken.
    pub fn available(&self) -> usize {
        let shared = self.source.lock();
        self.storage.queue.len(&shared.cs)
    }

    pub const fn size(&self) -> usize {
        N
    }
}

impl<T: 'static, const N: usize> fmt::Debug for Listener<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("capacity", &N)
            .finish_non_exhaustive()
    }
}

/// A received message. Every listener that accepted the broadcast holds a
/// `Delivery` of the same block; the block goes back to the pool once the
/// last one is dropped or released.
pub struct Delivery<'n, T: 'static> {
    msg: NonNull<Message<T>>,
    shared: &'n Mutex<Shared<T>>,
}

impl<'n, T: 'static> Delivery<'n, T> {
    fn new(msg: NonNull<Message<T>>, shared: &'n Mutex<Shared<T>>) -> Self {
        Self { msg, shared }
    }

    /// Deliveries of this message not yet released, this one included.
    pub fn ref_count(&self) -> u16 {
        let shared = self.shared.lock();
        unsafe { self.msg.as_ref() }.ref_count(&shared.cs)
    }

    pub(crate) fn shared(&self) -> &'n Mutex<Shared<T>> {
        self.shared
    }
}

impl<T: 'static> Deref for Delivery<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { self.msg.as_ref().payload() }
    }
}

impl<T: 'static> Drop for Delivery<'_, T> {
    fn drop(&mut self) {
        let freed = self.shared.lock().release(self.msg);
        if freed {
            trace!("last delivery released, block reclaimed");
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Delivery<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Delivery").field(&**self).finish()
    }
}

unsafe impl<T: Send + Sync + 'static> Send for Delivery<'_, T> {}
unsafe impl<T: Send + Sync + 'static> Sync for Delivery<'_, T> {}

#[cfg(test)]
mod test {
    use super::{Listener, ListenerStorage};
    use crate::Notifier;

    fn publish(notifier: &Notifier<'_, u32>, value: u32) -> usize {
        let mut msg = notifier.allocate().unwrap();
        *msg = value;
        notifier.broadcast(msg)
    }

    #[test]
    fn drops_once_full() {
        let mut storage = ListenerStorage::<u32, 3>::new().unwrap();
        let mut spare = ListenerStorage::<u32, 8>::new().unwrap();
        let notifier = Notifier::new().unwrap();
        let listener = Listener::new(&notifier, &mut storage);
        let _other = Listener::new(&notifier, &mut spare);

        for value in 0..3 {
            assert_eq!(publish(&notifier, value), 2);
        }
        assert_eq!(publish(&notifier, 3), 1);
        assert_eq!(listener.available(), 3);
        assert_eq!(listener.size(), 3);

        for expected in 0..3 {
            let got = listener.get();
            assert_eq!(*got, expected);
            listener.release(got);
        }
        assert!(listener.try_get().is_none());
    }

    #[test]
    fn release_frees_after_last_holder() {
        let mut a = ListenerStorage::<u32, 2>::new().unwrap();
        let mut b = ListenerStorage::<u32, 2>::new().unwrap();
        let notifier = Notifier::new().unwrap();
        let first = Listener::new(&notifier, &mut a);
        let second = Listener::new(&notifier, &mut b);

        publish(&notifier, 9);
        assert_eq!(notifier.free(), 3);

        let x = first.get();
        let y = second.get();
        assert_eq!(x.ref_count(), 2);

        first.release(x);
        assert_eq!(y.ref_count(), 1);
        assert_eq!(notifier.free(), 3);

        drop(y);
        assert_eq!(notifier.free(), 4);
    }

    #[test]
    fn try_get_is_non_blocking() {
        let mut storage = ListenerStorage::<u32, 2>::new().unwrap();
        let notifier = Notifier::new().unwrap();
        let listener = Listener::new(&notifier, &mut storage);

        assert!(listener.try_get().is_none());
        publish(&notifier, 5);
        assert_eq!(listener.try_get().map(|d| *d), Some(5));
    }
}
