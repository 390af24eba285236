use core::{
  array,
  ptr::NonNull,
};

use slabpool_lock::SpinLock;
use slabpool_sys::math::is_aligned;

use crate::{
  classes::{
    ScIdx,
    class_for,
  },
  config::{
    ALLOC_LIMIT,
    HEADER_MIN,
    NCLASSES,
    SUPPORTED_ALIGNMENTS,
  },
  error::{
    PoolError,
    PoolResult,
  },
  header::Header,
  large::LargeBackend,
  slab::Slab,
};

enum Route {
  Class(ScIdx),
  Large,
}

/// The pool dispatcher: one slab per size class plus the large backend.
///
/// `allocate` embeds a reversible header in front of every returned
/// pointer, so `deallocate` needs nothing but the pointer. The pool lock
/// covers class selection only and is never held together with a slab
/// lock; the acquisition order pool-then-slab is fixed by structure, so
/// the two-level discipline cannot deadlock.
pub struct Pool {
  slabs: [Slab; NCLASSES],
  large: LargeBackend,
  lock: SpinLock<()>,
}

impl Pool {
  pub fn new() -> Self {
    log::debug!("pool created: classes={}", NCLASSES);

    Self {
      slabs: array::from_fn(|i| Slab::new(ScIdx(i))),
      large: LargeBackend::new(),
      lock: SpinLock::new(()),
    }
  }

  /// Allocates `user_bytes` at `alignment` (4, 8 or 16; default 8 via
  /// [`Pool::allocate_default`]).
  ///
  /// The returned pointer is `alignment`-aligned and valid for
  /// `user_bytes` bytes. On failure the pool is unchanged.
  pub fn allocate(&self, user_bytes: usize, alignment: usize) -> PoolResult<NonNull<u8>> {
    if !SUPPORTED_ALIGNMENTS.contains(&alignment) {
      return Err(PoolError::InvalidArgument("unsupported alignment"));
    }

    let header_size = HEADER_MIN.max(alignment);
    if user_bytes > ALLOC_LIMIT - header_size {
      return Err(PoolError::OutOfRange("request exceeds the allocation limit"));
    }

    let header = Header::new(user_bytes, alignment);
    let total = header.total();

    let slot = match self.route(total) {
      Route::Class(idx) => self.slabs[idx.0].allocate(total)?,
      Route::Large => self.large.allocate(total)?,
    };

    let user = unsafe { header.encode(slot) };
    debug_assert_eq!(
      is_aligned(user.as_ptr() as usize, alignment),
      Some(true),
      "user pointer must honor the requested alignment"
    );
    Ok(user)
  }

  /// `allocate` at the default alignment of 8.
  pub fn allocate_default(&self, user_bytes: usize) -> PoolResult<NonNull<u8>> {
    self.allocate(user_bytes, 8)
  }

  /// Returns an allocation to its owning arena. Null is accepted as a
  /// no-op. On failure the pool is unchanged.
  pub fn deallocate(&self, ptr: *mut u8) -> PoolResult<()> {
    let Some(user) = NonNull::new(ptr) else {
      return Ok(());
    };

    let header = unsafe { Header::decode(user) };
    if !header.is_valid() {
      return Err(PoolError::InvalidArgument("corrupt allocation header"));
    }

    let slot = unsafe { header.slot_base(user) };
    let total = header.total();

    match self.route(total) {
      Route::Class(idx) => self.slabs[idx.0].deallocate(slot)?,
      Route::Large => self.large.deallocate(slot, total)?,
    }
    Ok(())
  }

  /// Usable size of a live allocation, decoded from its header.
  ///
  /// # Safety
  ///
  /// `ptr` must be a pointer previously returned by `allocate` on this
  /// pool and not yet deallocated.
  pub unsafe fn size_of(&self, ptr: NonNull<u8>) -> usize {
    let header = unsafe { Header::decode(ptr) };
    debug_assert!(header.is_valid());
    header.user_size()
  }

  /// The class table is consulted under the pool lock, which is dropped
  /// before any slab lock is taken.
  fn route(&self, total: usize) -> Route {
    let _guard = self.lock.lock();
    match class_for(total) {
      Some(idx) => Route::Class(idx),
      None => Route::Large,
    }
  }

  pub fn stats(&self) -> PoolStats {
    PoolStats {
      classes: array::from_fn(|i| {
        let slab = &self.slabs[i];
        ClassStats {
          class_size: slab.class().0,
          chunks: slab.chunk_count(),
          live_slots: slab.live_slots(),
        }
      }),
    }
  }
}

impl Default for Pool {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassStats {
  pub class_size: usize,
  pub chunks: usize,
  pub live_slots: usize,
}

#[derive(Debug, Clone)]
pub struct PoolStats {
  pub classes: [ClassStats; NCLASSES],
}

impl PoolStats {
  pub fn class(&self, class_size: usize) -> Option<&ClassStats> {
    self.classes.iter().find(|c| c.class_size == class_size)
  }

  pub fn total_chunks(&self) -> usize {
    self.classes.iter().map(|c| c.chunks).sum()
  }

  pub fn total_live(&self) -> usize {
    self.classes.iter().map(|c| c.live_slots).sum()
  }
}
