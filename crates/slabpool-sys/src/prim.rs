use core::sync::atomic::{
  AtomicUsize,
  Ordering,
};

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const COMMON_PAGE_SIZE: usize = 4096;

/// Alignment of every region handed out by the system layer.
pub const fn min_align() -> usize {
  16
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn page_size_helper() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn page_size_helper() -> usize {
  COMMON_PAGE_SIZE
}

pub fn page_size() -> usize {
  static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

  let cached = PAGE_SIZE.load(Ordering::Acquire);
  if cached != 0 {
    return cached;
  }

  let size = page_size_helper();
  PAGE_SIZE.store(size, Ordering::Release);
  size
}
