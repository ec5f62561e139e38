//! Fixed-capacity multicast notifier.
//!
//! One producer publishes messages of a single type; every [`Listener`]
//! gets its own handle to each message through a private bounded queue.
//! Messages are never copied: all listeners share one pool block, which is
//! reference counted and goes back to the pool when the last listener lets
//! go of it. The pool is built entirely from blocks the listeners bring
//! along, so nothing is heap allocated once the listeners exist.
//!
//! ```
//! use notifier::{Listener, ListenerStorage, Notifier};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut storage = ListenerStorage::<u32, 4>::new()?;
//! let notifier = Notifier::new()?;
//! let listener = Listener::new(&notifier, &mut storage);
//!
//! if let Some(mut msg) = notifier.allocate() {
//!     *msg = 42;
//!     assert_eq!(notifier.broadcast(msg), 1);
//! }
//!
//! let msg = listener.get();
//! assert_eq!(*msg, 42);
//! listener.release(msg);
//! # Ok(())
//! # }
//! ```

use anyhow::bail;
use libc::{__errno_location, c_int};

mod link;
mod listener;
mod message;
mod notifier;
mod pool;
mod queue;
mod sync;

pub use listener::{Delivery, Listener, ListenerStorage};
pub use notifier::{Draft, Notifier};

pub(crate) trait CheckOk<R> {
    fn r(self, op: &str) -> Result<R, anyhow::Error>;
}

impl CheckOk<()> for c_int {
    fn r(self, op: &str) -> Result<(), anyhow::Error> {
        if self != 0 {
            bail!("Operation {op} failed: Code {self}");
        }
        Ok(())
    }
}

pub(crate) fn errno() -> c_int {
    unsafe { *__errno_location() }
}
