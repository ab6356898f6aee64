//! Handle-validated synchronization primitives (§4.6-§4.8).

pub mod critlock;
pub(crate) mod edit_lock;
pub mod future;
pub mod mutex;
pub mod queue;
pub mod semaphore;

pub use critlock::{acquire_critlock, create_critlock, destroy_critlock, release_critlock, Critlock, CritlockInner};
pub use future::{await_future, create_future, destroy_future, is_future_ready, set_future, Future, FutureInner};
pub use mutex::{
    acquire_mutex, create_mutex, destroy_mutex, is_mutex_locked, mutex_lock_count, release_mutex, Mutex, MutexInner,
    MutexKind,
};
pub use queue::{create_queue, destroy_queue, pop_queue, push_queue, Queue, QueueInner};
pub use semaphore::{
    acquire_semaphore, create_semaphore, destroy_semaphore, release_semaphore, semaphore_count, Semaphore,
    SemaphoreInner,
};
