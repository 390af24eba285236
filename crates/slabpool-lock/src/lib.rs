//! Test-and-test-and-set spinlock with a three-phase contention policy.
//!
//! Acquisition proceeds through bounded active spinning, then a short run
//! of randomized doubling sleeps, then a kernel-assisted wait on the lock
//! word. The randomized phase differentiates wait times between threads so
//! that a freed lock is not stormed by every waiter at once; it does not
//! need to be highly random nor highly accurate, only different per thread.

use core::{
  cell::UnsafeCell,
  ops::{
    Deref,
    DerefMut,
  },
  sync::atomic::{
    AtomicU32,
    Ordering,
  },
};
use std::{
  cell::RefCell,
  thread,
  time::Duration,
};

use rand::{
  Rng,
  SeedableRng,
  rngs::SmallRng,
};
use slabpool_sys::futex;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Iterations of the relaxed-load spin phase per acquisition round.
const SPIN_ROUNDS: usize = 100;
/// Failed rounds that sleep before escalating to the kernel wait.
const BACKOFF_LIMIT: u32 = 10;

thread_local! {
  static BACKOFF_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

fn initial_wait() -> Duration {
  let nanos = BACKOFF_RNG.with(|rng| rng.borrow_mut().random_range(1..=100u64));
  Duration::from_nanos(nanos)
}

/// A mutual-exclusion lock over `T`.
///
/// `lock` never fails; under pathological contention it is only slow.
/// `try_lock` is permitted to spuriously return `None`.
pub struct SpinLock<T: ?Sized> {
  flag: AtomicU32,
  data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
  pub const fn new(data: T) -> Self {
    Self {
      flag: AtomicU32::new(UNLOCKED),
      data: UnsafeCell::new(data),
    }
  }

  pub fn into_inner(self) -> T {
    self.data.into_inner()
  }
}

impl<T: ?Sized> SpinLock<T> {
  pub fn lock(&self) -> SpinLockGuard<'_, T> {
    let mut wait_time = initial_wait();
    let mut backoffs = 0u32;

    loop {
      // Spin while the lock appears held. The relaxed load is only a
      // hint; the acquire on the successful exchange below is what
      // establishes happens-before with the releasing unlock.
      for _ in 0..SPIN_ROUNDS {
        if self.flag.load(Ordering::Relaxed) == UNLOCKED {
          break;
        }
        thread::yield_now();
      }

      if self
        .flag
        .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
      {
        return SpinLockGuard { lock: self };
      }

      if backoffs < BACKOFF_LIMIT {
        thread::sleep(wait_time);
        wait_time += wait_time;
        backoffs += 1;
      } else {
        // The kernel evaluates the word atomically and returns at once
        // if it no longer reads LOCKED, so the wakeup from unlock cannot
        // be lost. Relaxed is sufficient: the wait itself synchronizes
        // nothing, the retry's exchange does.
        futex::wait(&self.flag, LOCKED);
      }
    }
  }

  pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
    if self.flag.load(Ordering::Relaxed) == LOCKED {
      return None;
    }

    self
      .flag
      .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
      .ok()?;
    Some(SpinLockGuard { lock: self })
  }

  pub fn get_mut(&mut self) -> &mut T {
    self.data.get_mut()
  }

  fn unlock(&self) {
    self.flag.store(UNLOCKED, Ordering::Release);
    futex::wake_one(&self.flag);
  }
}

impl<T: Default> Default for SpinLock<T> {
  fn default() -> Self {
    Self::new(T::default())
  }
}

pub struct SpinLockGuard<'lock, T: ?Sized> {
  lock: &'lock SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    unsafe { &*self.lock.data.get() }
  }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.lock.data.get() }
  }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
  fn drop(&mut self) {
    self.lock.unlock();
  }
}
