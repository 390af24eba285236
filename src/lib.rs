//! slabpool: a size-class slab memory pool.
//!
//! Small requests are served from per-class arenas backed by 4 KiB
//! chunks; anything above the largest class goes to the system allocator
//! through a uniform backend. Every allocation carries a reversible
//! header, so freeing needs only the pointer.
//!
//! This facade re-exports the core [`Pool`] together with the RAII
//! handle layer: [`PoolBox`] and [`PoolArray`] for unique ownership,
//! [`PoolShared`]/[`PoolWeak`] for reference-counted sharing, and
//! [`PoolAlloc`] to plug a pool into allocator-shaped interfaces.

pub mod adapter;
pub mod boxed;
pub mod shared;

pub use adapter::PoolAlloc;
pub use boxed::{
  PoolArray,
  PoolBox,
};
pub use shared::{
  PoolShared,
  PoolWeak,
};
pub use slabpool_alloc::{
  ClassStats,
  Pool,
  PoolError,
  PoolResult,
  PoolStats,
};
pub use slabpool_lock::{
  SpinLock,
  SpinLockGuard,
};
pub use slabpool_observe::{
  LifetimeObserver,
  RefKind,
};

pub mod prelude {
  pub use super::{
    LifetimeObserver,
    Pool,
    PoolAlloc,
    PoolArray,
    PoolBox,
    PoolError,
    PoolResult,
    PoolShared,
    PoolWeak,
    SpinLock,
  };
}

/// Largest alignment the pool honors.
pub(crate) const MAX_ALIGN: usize = 16;
/// Smallest alignment the pool accepts; smaller natural alignments are
/// rounded up to it.
pub(crate) const MIN_ALIGN: usize = 4;

pub(crate) fn layout_align(natural: usize) -> Option<usize> {
  if natural > MAX_ALIGN {
    return None;
  }
  Some(natural.max(MIN_ALIGN))
}
