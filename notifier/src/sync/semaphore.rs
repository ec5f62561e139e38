use std::{cell::UnsafeCell, mem::MaybeUninit};

use libc::{sem_destroy, sem_init, sem_post, sem_t, sem_trywait, sem_wait, EAGAIN, EINTR};

use crate::{errno, CheckOk};

/// Unnamed POSIX counting semaphore, private to this process.
#[derive(Debug)]
pub struct Semaphore {
    inner: UnsafeCell<MaybeUninit<sem_t>>,
}

impl Semaphore {
    pub fn new(value: u32) -> anyhow::Result<Self> {
        let inner = UnsafeCell::new(MaybeUninit::uninit());
        unsafe { sem_init((*inner.get()).as_mut_ptr(), 0, value) }.r("sem_init")?;
        Ok(Self { inner })
    }

    /// Blocks until the count is positive, then decrements it.
    pub fn wait(&self) {
        loop {
            if unsafe { sem_wait((*self.inner.get()).as_mut_ptr()) } == 0 {
                return;
            }
            // sem_wait is never restarted after a signal handler runs
            match errno() {
                EINTR => continue,
                e => panic!("failed to wait for semaphore: {e}"),
            }
        }
    }

    /// Decrements the count if it is positive. Never blocks.
    pub fn try_wait(&self) -> bool {
        loop {
            if unsafe { sem_trywait((*self.inner.get()).as_mut_ptr()) } == 0 {
                return true;
            }
            match errno() {
                EAGAIN => return false,
                EINTR => continue,
                e => panic!("failed to poll semaphore: {e}"),
            }
        }
    }

    pub fn post(&self) {
        if unsafe { sem_post((*self.inner.get()).as_mut_ptr()) } != 0 {
            panic!("failed to post semaphore");
        }
    }
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if unsafe { sem_destroy((*self.inner.get()).as_mut_ptr()) } != 0 {
            panic!("failed to destroy semaphore");
        }
    }
}
