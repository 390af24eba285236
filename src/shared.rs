//! Reference-counted shared handles over pool memory.
//!
//! The control block (strong and weak counts) and the value live in one
//! pool allocation. The value is dropped in place when the last strong
//! handle goes away; the allocation returns to the pool when the last
//! handle of either kind does. The weak count carries one implicit
//! reference held collectively by the strong handles.

use core::{
  fmt,
  mem::{
    self,
    ManuallyDrop,
  },
  ops::Deref,
  ptr::NonNull,
  sync::atomic::{
    AtomicUsize,
    Ordering,
    fence,
  },
};

use slabpool_alloc::{
  Pool,
  PoolError,
  PoolResult,
};

use crate::layout_align;

struct SharedInner<T> {
  strong: AtomicUsize,
  weak: AtomicUsize,
  value: ManuallyDrop<T>,
}

/// Shared ownership of a pool-allocated `T`.
pub struct PoolShared<'pool, T> {
  inner: NonNull<SharedInner<T>>,
  pool: &'pool Pool,
}

/// Non-owning reference to a [`PoolShared`] allocation.
pub struct PoolWeak<'pool, T> {
  inner: NonNull<SharedInner<T>>,
  pool: &'pool Pool,
}

unsafe impl<T: Send + Sync> Send for PoolShared<'_, T> {}
unsafe impl<T: Send + Sync> Sync for PoolShared<'_, T> {}
unsafe impl<T: Send + Sync> Send for PoolWeak<'_, T> {}
unsafe impl<T: Send + Sync> Sync for PoolWeak<'_, T> {}

impl<'pool, T> PoolShared<'pool, T> {
  pub fn new(pool: &'pool Pool, value: T) -> PoolResult<Self> {
    let align = layout_align(mem::align_of::<SharedInner<T>>())
      .ok_or(PoolError::InvalidArgument("type alignment exceeds 16"))?;

    let raw = pool.allocate(mem::size_of::<SharedInner<T>>(), align)?;
    let inner = raw.cast::<SharedInner<T>>();

    unsafe {
      inner.write(SharedInner {
        strong: AtomicUsize::new(1),
        weak: AtomicUsize::new(1),
        value: ManuallyDrop::new(value),
      });
    }

    Ok(Self { inner, pool })
  }

  fn inner(&self) -> &SharedInner<T> {
    unsafe { self.inner.as_ref() }
  }

  pub fn strong_count(&self) -> usize {
    self.inner().strong.load(Ordering::Relaxed)
  }

  pub fn weak_count(&self) -> usize {
    // Exclude the implicit reference held by the strong handles.
    self.inner().weak.load(Ordering::Relaxed) - 1
  }

  pub fn downgrade(&self) -> PoolWeak<'pool, T> {
    self.inner().weak.fetch_add(1, Ordering::Relaxed);
    PoolWeak {
      inner: self.inner,
      pool: self.pool,
    }
  }

  pub fn ptr_eq(&self, other: &Self) -> bool {
    self.inner == other.inner
  }
}

impl<T> Deref for PoolShared<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.inner().value
  }
}

impl<T> Clone for PoolShared<'_, T> {
  fn clone(&self) -> Self {
    self.inner().strong.fetch_add(1, Ordering::Relaxed);
    Self {
      inner: self.inner,
      pool: self.pool,
    }
  }
}

impl<T> Drop for PoolShared<'_, T> {
  fn drop(&mut self) {
    if self.inner().strong.fetch_sub(1, Ordering::Release) != 1 {
      return;
    }

    // Last strong handle: synchronize with every preceding release,
    // destroy the value, then give up the strong handles' implicit weak
    // reference.
    fence(Ordering::Acquire);
    unsafe {
      let inner = self.inner.as_ptr();
      ManuallyDrop::drop(&mut (*inner).value);
    }

    if self.inner().weak.fetch_sub(1, Ordering::Release) == 1 {
      fence(Ordering::Acquire);
      let result = self.pool.deallocate(self.inner.cast::<u8>().as_ptr());
      debug_assert!(result.is_ok());
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for PoolShared<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    (**self).fmt(f)
  }
}

impl<'pool, T> PoolWeak<'pool, T> {
  fn inner(&self) -> &SharedInner<T> {
    unsafe { self.inner.as_ref() }
  }

  /// Attempts to promote to a strong handle; fails once the value has
  /// been destroyed.
  pub fn upgrade(&self) -> Option<PoolShared<'pool, T>> {
    let strong = &self.inner().strong;
    let mut count = strong.load(Ordering::Relaxed);

    loop {
      if count == 0 {
        return None;
      }
      match strong.compare_exchange_weak(
        count,
        count + 1,
        Ordering::Acquire,
        Ordering::Relaxed,
      ) {
        Ok(_) => {
          return Some(PoolShared {
            inner: self.inner,
            pool: self.pool,
          });
        }
        Err(observed) => count = observed,
      }
    }
  }
}

impl<T> Clone for PoolWeak<'_, T> {
  fn clone(&self) -> Self {
    self.inner().weak.fetch_add(1, Ordering::Relaxed);
    Self {
      inner: self.inner,
      pool: self.pool,
    }
  }
}

impl<T> Drop for PoolWeak<'_, T> {
  fn drop(&mut self) {
    if self.inner().weak.fetch_sub(1, Ordering::Release) == 1 {
      fence(Ordering::Acquire);
      let result = self.pool.deallocate(self.inner.cast::<u8>().as_ptr());
      debug_assert!(result.is_ok());
    }
  }
}
