use std::collections::BTreeMap;

use notifier::{Delivery, Listener, ListenerStorage, Notifier};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct LedData {
    pin: u8,
    set: bool,
}

fn publish(notifier: &Notifier<'_, LedData>, pin: u8, set: bool) -> Option<usize> {
    let mut msg = notifier.allocate()?;
    msg.pin = pin;
    msg.set = set;
    Some(notifier.broadcast(msg))
}

#[test]
fn two_listeners_without_consumers() {
    let mut small = ListenerStorage::<LedData, 2>::new().unwrap();
    let mut large = ListenerStorage::<LedData, 5>::new().unwrap();
    let notifier = Notifier::new().unwrap();
    let small = Listener::new(&notifier, &mut small);
    let large = Listener::new(&notifier, &mut large);
    assert_eq!(notifier.capacity(), 7);

    let sent = [(13, true), (12, true), (13, false), (12, false)];
    let accepted: Vec<_> = sent
        .iter()
        .map(|&(pin, set)| publish(&notifier, pin, set).unwrap())
        .collect();

    // The small queue fills after two messages and misses the rest.
    assert_eq!(accepted, [2, 2, 1, 1]);
    assert_eq!(small.available(), 2);
    assert_eq!(large.available(), 4);
    assert_eq!(notifier.free(), 3);

    for &(pin, set) in &sent[..2] {
        let msg = small.get();
        assert_eq!(*msg, LedData { pin, set });
        small.release(msg);
    }
    for &(pin, set) in &sent {
        let msg = large.get();
        assert_eq!(*msg, LedData { pin, set });
        large.release(msg);
    }
    assert_eq!(notifier.free(), 7);
}

#[test]
fn full_listener_does_not_block_others() {
    let mut stuck = ListenerStorage::<LedData, 1>::new().unwrap();
    let mut open = ListenerStorage::<LedData, 4>::new().unwrap();
    let notifier = Notifier::new().unwrap();
    let stuck = Listener::new(&notifier, &mut stuck);
    let open = Listener::new(&notifier, &mut open);

    assert_eq!(publish(&notifier, 1, true), Some(2));
    for pin in 2..5 {
        assert_eq!(publish(&notifier, pin, true), Some(1));
    }

    assert_eq!(stuck.available(), 1);
    assert_eq!(open.available(), 4);
    assert_eq!(stuck.get().pin, 1);
    for pin in 1..5 {
        assert_eq!(open.get().pin, pin);
    }
}

#[test]
fn exhausted_pool_recovers_after_release() {
    let mut a = ListenerStorage::<LedData, 2>::new().unwrap();
    let mut b = ListenerStorage::<LedData, 1>::new().unwrap();
    let notifier = Notifier::new().unwrap();
    let _a = Listener::new(&notifier, &mut a);
    let b = Listener::new(&notifier, &mut b);
    let capacity = notifier.capacity();
    assert_eq!(capacity, 3);

    let drafts: Vec<_> = (0..capacity).map(|_| notifier.allocate().unwrap()).collect();
    assert!(notifier.allocate().is_none());

    // Publishing one hands it to both listeners; the other two are dropped
    // unpublished and return to the pool.
    let mut drafts = drafts.into_iter();
    assert_eq!(notifier.broadcast(drafts.next().unwrap()), 2);
    assert!(notifier.allocate().is_none());
    drop(drafts);
    assert_eq!(notifier.free(), 2);

    let msg = b.get();
    assert_eq!(msg.ref_count(), 2);
    b.release(msg);
    assert_eq!(notifier.free(), 2);
}

#[test]
fn blocks_are_conserved() {
    let mut a = ListenerStorage::<LedData, 3>::new().unwrap();
    let mut b = ListenerStorage::<LedData, 2>::new().unwrap();
    let notifier = Notifier::new().unwrap();
    let a = Listener::new(&notifier, &mut a);
    let b = Listener::new(&notifier, &mut b);

    // Every round publishes a distinct pin, so a pin names one block. Tracks
    // how many listeners still reference each block in flight.
    let mut refs = BTreeMap::new();
    let mut held = Vec::new();

    for round in 0..40u8 {
        if let Some(accepted) = publish(&notifier, round, round % 2 == 0) {
            if accepted > 0 {
                refs.insert(round, accepted);
            }
        }
        check(&notifier, &refs, &held);

        if round % 3 == 0 {
            held.extend(a.try_get());
        }
        if round % 5 == 0 {
            held.extend(b.try_get());
        }
        check(&notifier, &refs, &held);

        if round % 7 == 0 {
            release_all(&mut held, &mut refs);
        }
        check(&notifier, &refs, &held);
    }

    release_all(&mut held, &mut refs);
    held.extend(std::iter::from_fn(|| a.try_get()));
    held.extend(std::iter::from_fn(|| b.try_get()));
    check(&notifier, &refs, &held);
    release_all(&mut held, &mut refs);

    assert!(refs.is_empty());
    assert_eq!(notifier.free(), notifier.capacity());
}

/// Free blocks plus distinct blocks in flight add up to the whole pool, and
/// every held block carries exactly the references still expected.
fn check(
    notifier: &Notifier<'_, LedData>,
    refs: &BTreeMap<u8, usize>,
    held: &[Delivery<'_, LedData>],
) {
    assert_eq!(notifier.free() + refs.len(), notifier.capacity());
    for msg in held {
        assert_eq!(usize::from(msg.ref_count()), refs[&msg.pin]);
    }
}

fn release_all(held: &mut Vec<Delivery<'_, LedData>>, refs: &mut BTreeMap<u8, usize>) {
    for msg in held.drain(..) {
        let pin = msg.pin;
        drop(msg);

        let left = refs[&pin] - 1;
        if left == 0 {
            refs.remove(&pin);
        } else {
            refs.insert(pin, left);
        }
    }
}
