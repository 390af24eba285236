//! Kernel-assisted wait on a 32-bit atomic word.
//!
//! `wait` suspends the calling thread while the word holds `expected`;
//! `wake_one` releases at most one waiter. The kernel evaluates the
//! word atomically, so a wake that races a late waiter is never lost:
//! the wait returns immediately if the word no longer matches. Spurious
//! wakeups are possible on every platform and callers must re-check
//! their predicate.

use core::sync::atomic::AtomicU32;

#[cfg(target_os = "linux")]
pub fn wait(word: &AtomicU32, expected: u32) {
  unsafe {
    libc::syscall(
      libc::SYS_futex,
      word as *const AtomicU32,
      libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
      expected,
      core::ptr::null::<libc::timespec>(),
    );
  }
}

#[cfg(target_os = "linux")]
pub fn wake_one(word: &AtomicU32) {
  unsafe {
    libc::syscall(
      libc::SYS_futex,
      word as *const AtomicU32,
      libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
      1i32,
    );
  }
}

#[cfg(target_os = "macos")]
mod ulock {
  pub const UL_COMPARE_AND_WAIT: u32 = 1;
  pub const ULF_NO_ERRNO: u32 = 0x0100_0000;

  unsafe extern "C" {
    pub fn __ulock_wait(
      operation: u32,
      addr: *mut libc::c_void,
      value: u64,
      timeout_us: u32,
    ) -> libc::c_int;
    pub fn __ulock_wake(operation: u32, addr: *mut libc::c_void, wake_value: u64) -> libc::c_int;
  }
}

#[cfg(target_os = "macos")]
pub fn wait(word: &AtomicU32, expected: u32) {
  unsafe {
    ulock::__ulock_wait(
      ulock::UL_COMPARE_AND_WAIT | ulock::ULF_NO_ERRNO,
      word as *const AtomicU32 as *mut libc::c_void,
      expected as u64,
      0,
    );
  }
}

#[cfg(target_os = "macos")]
pub fn wake_one(word: &AtomicU32) {
  unsafe {
    ulock::__ulock_wake(
      ulock::UL_COMPARE_AND_WAIT | ulock::ULF_NO_ERRNO,
      word as *const AtomicU32 as *mut libc::c_void,
      0,
    );
  }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn wait(word: &AtomicU32, expected: u32) {
  // No kernel primitive available; degrade to a polite spin.
  if word.load(core::sync::atomic::Ordering::Relaxed) == expected {
    core::hint::spin_loop();
  }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn wake_one(_word: &AtomicU32) {}

#[cfg(test)]
mod tests {
  use super::*;
  use core::sync::atomic::{
    AtomicU32,
    Ordering,
  };
  use std::{
    sync::Arc,
    thread,
    time::Duration,
  };

  #[test]
  fn wait_returns_when_value_differs() {
    let word = AtomicU32::new(0);
    // Word does not hold the expected value, so this must not block.
    wait(&word, 1);
  }

  #[test]
  fn wake_releases_waiter() {
    let word = Arc::new(AtomicU32::new(1));
    let waiter = {
      let word = Arc::clone(&word);
      thread::spawn(move || {
        while word.load(Ordering::Acquire) == 1 {
          wait(&word, 1);
        }
      })
    };

    thread::sleep(Duration::from_millis(10));
    word.store(0, Ordering::Release);
    wake_one(&word);
    waiter.join().unwrap();
  }
}
