use core::ptr::NonNull;

use slabpool_sys::{
  GLOBAL_SYSTEM,
  system::SysError,
};

use crate::config::{
  ALLOC_LIMIT,
  SMALL_CUTOFF,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LargeError {
  OutOfRange,
  System(SysError),
}

pub type LargeResult<T> = Result<T, LargeError>;

/// Stateless arena over the system allocator for requests too big for any
/// class. Callers route here only for totals above `SMALL_CUTOFF`; the
/// upper bound is `ALLOC_LIMIT`.
pub struct LargeBackend {}

impl LargeBackend {
  pub const fn new() -> Self {
    Self {}
  }

  pub fn allocate(&self, bytes: usize) -> LargeResult<NonNull<u8>> {
    debug_assert!(bytes > SMALL_CUTOFF, "small request routed to large backend");

    if bytes > ALLOC_LIMIT {
      return Err(LargeError::OutOfRange);
    }

    log::trace!("large allocate: bytes={}", bytes);

    let mem = unsafe { GLOBAL_SYSTEM.alloc(bytes) }.map_err(LargeError::System)?;
    // System regions are never empty for a nonzero request.
    Ok(unsafe { NonNull::new_unchecked(mem.as_mut_ptr()) })
  }

  /// Returns a region obtained from `allocate`. `bytes` must be the size
  /// originally requested.
  pub fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) -> LargeResult<()> {
    let slice = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), bytes) };
    unsafe { GLOBAL_SYSTEM.dealloc(slice) }.map_err(LargeError::System)?;
    Ok(())
  }
}

impl Default for LargeBackend {
  fn default() -> Self {
    Self::new()
  }
}
