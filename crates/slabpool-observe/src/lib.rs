//! Lifetime observation for objects with indeterminate lifetimes.
//!
//! A [`LifetimeObserver`] tracks whether an object is still alive without
//! keeping it alive. The intended shape: an object holds an `Owner` handle
//! as a field; a callback registered with some external system (an event
//! loop, a timer, a network handler) captures `observer()` of that handle.
//! When the callback later fires it asks `is_alive()` first, and if the
//! object has since been destroyed it returns without touching it.
//!
//! Unlike a shared handle, an observer never owns the observed value; the
//! control block outlives the object only to answer the liveness question.
//!
//! Both logical counts live in one 64-bit atomic (owners in the high word)
//! so that the "both counts reached zero" decision is taken from a single
//! `fetch_sub` observation and two handles racing their final drops cannot
//! both free the block.

use core::{
  fmt,
  ptr::NonNull,
  sync::atomic::{
    AtomicU64,
    Ordering,
    fence,
  },
};

const OWNER_UNIT: u64 = 1 << 32;
const OBSERVER_MASK: u64 = OWNER_UNIT - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
  Owner,
  Observer,
}

struct ControlBlock {
  counts: AtomicU64,
}

impl ControlBlock {
  fn new_owner() -> NonNull<ControlBlock> {
    let block = Box::new(ControlBlock {
      counts: AtomicU64::new(OWNER_UNIT),
    });
    unsafe { NonNull::new_unchecked(Box::into_raw(block)) }
  }
}

pub struct LifetimeObserver {
  block: NonNull<ControlBlock>,
  kind: RefKind,
}

unsafe impl Send for LifetimeObserver {}
unsafe impl Sync for LifetimeObserver {}

impl LifetimeObserver {
  /// Creates an owner handle over a fresh control block.
  pub fn new() -> Self {
    Self {
      block: ControlBlock::new_owner(),
      kind: RefKind::Owner,
    }
  }

  fn counts(&self) -> &AtomicU64 {
    unsafe { &self.block.as_ref().counts }
  }

  /// An observer handle sharing this handle's control block.
  ///
  /// The observer outlives the owner safely: it keeps the control block
  /// (not the observed object) alive.
  pub fn observer(&self) -> Self {
    self.counts().fetch_add(1, Ordering::Relaxed);
    Self {
      block: self.block,
      kind: RefKind::Observer,
    }
  }

  /// Whether any owner handle over this control block is still live.
  pub fn is_alive(&self) -> bool {
    self.counts().load(Ordering::Relaxed) >> 32 > 0
  }

  pub fn kind(&self) -> RefKind {
    self.kind
  }

  pub fn owner_count(&self) -> i64 {
    (self.counts().load(Ordering::Relaxed) >> 32) as i64
  }

  pub fn observer_count(&self) -> i64 {
    (self.counts().load(Ordering::Relaxed) & OBSERVER_MASK) as i64
  }
}

impl Default for LifetimeObserver {
  fn default() -> Self {
    Self::new()
  }
}

impl Clone for LifetimeObserver {
  /// Cloning an owner models cloning the observed object itself: the copy
  /// gets a fresh control block with an independent lifetime. Cloning an
  /// observer shares the block.
  fn clone(&self) -> Self {
    match self.kind {
      RefKind::Owner => Self::new(),
      RefKind::Observer => {
        self.counts().fetch_add(1, Ordering::Relaxed);
        Self {
          block: self.block,
          kind: RefKind::Observer,
        }
      }
    }
  }
}

impl Drop for LifetimeObserver {
  fn drop(&mut self) {
    let unit = match self.kind {
      RefKind::Owner => OWNER_UNIT,
      RefKind::Observer => 1,
    };

    let old = self.counts().fetch_sub(unit, Ordering::Release);
    match self.kind {
      RefKind::Owner => assert!(old >> 32 > 0, "owner count went negative"),
      RefKind::Observer => assert!(old & OBSERVER_MASK > 0, "observer count went negative"),
    }

    if old == unit {
      // This drop took the last reference of either kind; synchronize
      // with every preceding release before freeing the block.
      fence(Ordering::Acquire);
      drop(unsafe { Box::from_raw(self.block.as_ptr()) });
    }
  }
}

impl fmt::Debug for LifetimeObserver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LifetimeObserver")
      .field("kind", &self.kind)
      .field("owners", &self.owner_count())
      .field("observers", &self.observer_count())
      .field("alive", &self.is_alive())
      .finish()
  }
}
