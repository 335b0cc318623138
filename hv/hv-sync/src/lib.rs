//! # Synchronization Primitives
//!
//! The two primitives this core needs and nothing more: a spinlock for the
//! page-table update engine, and a one-shot init cell for values frozen
//! during single-threaded boot and read-only afterwards.

#![cfg_attr(not(test), no_std)]

mod once_init;
mod spin_lock;

pub use crate::once_init::OnceInit;
pub use crate::spin_lock::{SpinLock, SpinLockGuard};
