use std::{cell::UnsafeCell, fmt, marker::PhantomData, ptr::NonNull};

use crate::{notifier::CriticalSection, queue::Post};

/// Subscription record. Lives inside the listener's storage and is threaded
/// into the notifier's subscriber list; once linked it is never unlinked.
pub(crate) struct ListenerLink<T: 'static> {
    queue: Option<NonNull<dyn Post<T>>>,
    next: UnsafeCell<Option<NonNull<ListenerLink<T>>>>,
}

impl<T: 'static> ListenerLink<T> {
    pub(crate) const fn new() -> Self {
        Self {
            queue: None,
            next: UnsafeCell::new(None),
        }
    }

    /// Points the link at its listener's queue and detaches it from any
    /// previous list. Exclusive access means no notifier can see it yet.
    pub(crate) fn bind(&mut self, queue: &(dyn Post<T> + 'static)) {
        self.queue = Some(NonNull::from(queue));
        *self.next.get_mut() = None;
    }

    pub(crate) fn queue(&self) -> Option<&dyn Post<T>> {
        // The queue sits next to this link in the same listener storage and
        // lives exactly as long.
        self.queue.map(|q| unsafe { q.as_ref() })
    }

    fn next(&self, _cs: &CriticalSection) -> Option<NonNull<ListenerLink<T>>> {
        unsafe { *self.next.get() }
    }

    fn link(&self, next: NonNull<ListenerLink<T>>, _cs: &CriticalSection) {
        unsafe { *self.next.get() = Some(next) };
    }
}

impl<T: 'static> fmt::Debug for ListenerLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerLink")
            .field("bound", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

unsafe impl<T: Send + Sync + 'static> Send for ListenerLink<T> {}
unsafe impl<T: Send + Sync + 'static> Sync for ListenerLink<T> {}

/// Append-only singly-linked list of subscriptions, in registration order.
pub(crate) struct SubscriberList<T: 'static> {
    head: Option<NonNull<ListenerLink<T>>>,
    tail: Option<NonNull<ListenerLink<T>>>,
    len: usize,
}

impl<T: 'static> SubscriberList<T> {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// # Safety
    /// `link` must stay at its address, and alive, for as long as this list
    /// is used.
    pub(crate) unsafe fn append(&mut self, link: &ListenerLink<T>, cs: &CriticalSection) {
        let node = NonNull::from(link);
        match self.tail {
            None => self.head = Some(node),
            Some(tail) => tail.as_ref().link(node, cs),
        }
        self.tail = Some(node);
        self.len += 1;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter<'l>(&'l self, cs: &'l CriticalSection) -> Iter<'l, T> {
        Iter {
            next: self.head,
            cs,
            _list: PhantomData,
        }
    }
}

pub(crate) struct Iter<'l, T: 'static> {
    next: Option<NonNull<ListenerLink<T>>>,
    cs: &'l CriticalSection,
    _list: PhantomData<&'l SubscriberList<T>>,
}

impl<'l, T: 'static> Iterator for Iter<'l, T> {
    type Item = &'l ListenerLink<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let link = unsafe { self.next?.as_ref() };
        self.next = link.next(self.cs);
        Some(link)
    }
}
