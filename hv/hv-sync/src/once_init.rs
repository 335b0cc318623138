use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const SET: u8 = 2;

/// A cell written at most once, then read-only for the rest of the
/// hypervisor's lifetime.
///
/// This is the carrier for `read-only-after-init` values such as the
/// direct-map offset: construction happens on one CPU during boot, every
/// later reader sees the published value without taking a lock.
pub struct OnceInit<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

// Safety: single writer before SET, shared reads after.
unsafe impl<T: Send + Sync> Sync for OnceInit<T> {}
unsafe impl<T: Send> Send for OnceInit<T> {}

impl<T> OnceInit<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Publish `value`. Returns `Err(value)` if the cell was already set
    /// (or is being set on another CPU).
    pub fn set(&self, value: T) -> Result<(), T> {
        if self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }
        // Safety: the BUSY transition makes us the only writer.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(SET, Ordering::Release);
        Ok(())
    }

    /// The published value, or `None` before initialization completes.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == SET {
            // Safety: SET is only stored after the write completed.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Initialize with `init` if empty, then return the published value.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        if self.get().is_none() {
            // A racing initializer wins harmlessly; ours is dropped.
            let _ = self.set(init());
        }
        loop {
            if let Some(v) = self.get() {
                return v;
            }
            spin_loop();
        }
    }
}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for OnceInit<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == SET {
            // Safety: SET implies the value was written.
            unsafe { (*self.value.get()).assume_init_drop() };
        }
    }
}
