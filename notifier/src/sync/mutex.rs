use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
};

use libc::{
    pthread_mutex_destroy, pthread_mutex_init, pthread_mutex_lock, pthread_mutex_t,
    pthread_mutex_unlock, pthread_mutexattr_destroy, pthread_mutexattr_init,
    pthread_mutexattr_settype, PTHREAD_MUTEX_NORMAL,
};

use crate::CheckOk;

/// pthread mutex guarding `T`. Backs the notifier's critical section.
#[derive(Debug)]
pub struct Mutex<T> {
    inner: UnsafeCell<MaybeUninit<pthread_mutex_t>>,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub fn new(data: T) -> anyhow::Result<Self> {
        let inner = UnsafeCell::new(MaybeUninit::uninit());
        let mut attr = MaybeUninit::uninit();
        unsafe {
            pthread_mutexattr_init(attr.as_mut_ptr()).r("attr_init")?;
            pthread_mutexattr_settype(attr.as_mut_ptr(), PTHREAD_MUTEX_NORMAL)
                .r("attr_settype")?;
            let res = pthread_mutex_init((*inner.get()).as_mut_ptr(), attr.as_ptr());
            pthread_mutexattr_destroy(attr.as_mut_ptr());
            res.r("mutex_init")?;
        }

        Ok(Self {
            inner,
            data: UnsafeCell::new(data),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        unsafe {
            if pthread_mutex_lock((*self.inner.get()).as_mut_ptr()) != 0 {
                panic!("failed to lock mutex");
            }
            MutexGuard {
                lock: self,
                data: &mut *self.data.get(),
            }
        }
    }
}

pub struct MutexGuard<'a, T: 'a> {
    lock: &'a Mutex<T>,
    data: &'a mut T,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            if pthread_mutex_unlock((*self.lock.inner.get()).as_mut_ptr()) != 0 {
                panic!("failed to unlock mutex");
            }
        }
    }
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        if unsafe { pthread_mutex_destroy((*self.inner.get()).as_mut_ptr()) } != 0 {
            panic!("failed to destroy mutex");
        }
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::Mutex;

    #[test]
    fn counts_across_threads() {
        let counter = Mutex::new(0usize).unwrap();

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        *counter.lock() += 1;
                    }
                });
            }
        });

        assert_eq!(*counter.lock(), 4000);
    }
}
