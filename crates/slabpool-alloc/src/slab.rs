use std::collections::BTreeMap;

use core::ptr::NonNull;

use getset::CloneGetters;
use slabpool_bitmap::Bitmap;
use slabpool_lock::SpinLock;
use slabpool_sys::system::SysError;

use crate::{
  chunk::Chunk,
  classes::{
    ScIdx,
    SizeClass,
    chunk_cap,
    chunk_size_for,
    class_at,
  },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlabError {
  /// The pointer is not a live slot base inside any chunk of this slab.
  UnknownPointer,
  /// The slot is already free (double free).
  SlotAlreadyFree,
  /// The class reached its backing-memory cap.
  ChunkLimit,
  System(SysError),
}

pub type SlabResult<T> = Result<T, SlabError>;

struct SlabInner {
  chunks: Vec<Chunk>,
  /// One bit per chunk; set while the chunk has at least one free slot.
  avail: Bitmap,
  /// Chunk base address to chunk index, ordered for predecessor queries.
  base_map: BTreeMap<usize, usize>,
}

/// A fixed-class arena.
///
/// All mutable state sits behind one spinlock; operations on distinct
/// slabs never contend.
#[derive(CloneGetters)]
pub struct Slab {
  #[getset(get_clone = "pub")]
  class: SizeClass,
  #[getset(get_clone = "pub")]
  chunk_size: usize,
  max_chunks: usize,
  inner: SpinLock<SlabInner>,
}

impl Slab {
  pub fn new(idx: ScIdx) -> Self {
    let class = class_at(idx);
    let chunk_size = chunk_size_for(class.0);

    log::debug!(
      "slab created: class={} chunk_size={}",
      class.0,
      chunk_size
    );

    Self {
      class,
      chunk_size,
      max_chunks: chunk_cap(chunk_size),
      inner: SpinLock::new(SlabInner {
        chunks: Vec::new(),
        avail: Bitmap::new(0),
        base_map: BTreeMap::new(),
      }),
    }
  }

  /// Reserves one slot and returns its base address.
  ///
  /// The slot's bit is set before the lock is released, so the address is
  /// observable as allocated no earlier than its return to the caller.
  pub fn allocate(&self, requested: usize) -> SlabResult<NonNull<u8>> {
    debug_assert!(requested <= self.class.0);

    let mut inner = self.inner.lock();

    let chunk_idx = match inner.avail.find_fs() {
      Some(idx) => idx,
      None => self.grow(&mut inner)?,
    };

    let chunk = &inner.chunks[chunk_idx];
    // The availability bit promised a free slot; the bitmaps only change
    // under this lock.
    let slot = chunk
      .occupancy()
      .find_fc()
      .expect("available chunk with no free slot");

    chunk.occupancy().set(slot).expect("slot index in range");
    if chunk.occupancy().is_full() {
      inner.avail.clear(chunk_idx).expect("chunk index in range");
    }

    Ok(chunk.slot_addr(slot))
  }

  /// Releases the slot at `ptr`.
  ///
  /// Fails with `UnknownPointer` if the address is not a slot base inside
  /// any chunk of this slab, and with `SlotAlreadyFree` on a double free;
  /// either way the slab is left unchanged.
  pub fn deallocate(&self, ptr: NonNull<u8>) -> SlabResult<()> {
    let addr = ptr.as_ptr() as usize;
    let inner = self.inner.lock();

    let chunk_idx = Self::resolve(&inner, addr, self.chunk_size)?;
    let chunk = &inner.chunks[chunk_idx];
    let slot = chunk.slot_of(addr)?;

    if !chunk.occupancy().get(slot).expect("slot index in range") {
      return Err(SlabError::SlotAlreadyFree);
    }

    chunk.occupancy().clear(slot).expect("slot index in range");
    inner.avail.set(chunk_idx).expect("chunk index in range");
    Ok(())
  }

  /// Predecessor query on the base-address map: the owning chunk is the
  /// one with the greatest base at or below `addr`, provided `addr` falls
  /// inside it. O(log chunks).
  fn resolve(inner: &SlabInner, addr: usize, chunk_size: usize) -> SlabResult<usize> {
    let (&base, &idx) = inner
      .base_map
      .range(..=addr)
      .next_back()
      .ok_or(SlabError::UnknownPointer)?;

    if addr < base + chunk_size {
      Ok(idx)
    } else {
      Err(SlabError::UnknownPointer)
    }
  }

  fn grow(&self, inner: &mut SlabInner) -> SlabResult<usize> {
    if inner.chunks.len() >= self.max_chunks {
      return Err(SlabError::ChunkLimit);
    }

    let chunk = Chunk::new(self.chunk_size, self.class.0)?;
    let idx = inner.chunks.len();

    log::trace!(
      "slab grow: class={} chunk_index={} base={:#x}",
      self.class.0,
      idx,
      chunk.base()
    );

    inner.base_map.insert(chunk.base(), idx);
    inner.chunks.push(chunk);
    inner.avail.grow(idx + 1);
    inner.avail.set(idx).expect("chunk index in range");
    Ok(idx)
  }

  pub fn chunk_count(&self) -> usize {
    self.inner.lock().chunks.len()
  }

  pub fn live_slots(&self) -> usize {
    let inner = self.inner.lock();
    inner.chunks.iter().map(|c| c.occupancy().used()).sum()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn slab_for_class(size: usize) -> Slab {
    let idx = crate::classes::class_for(size).unwrap();
    Slab::new(idx)
  }

  #[test]
  fn allocate_and_free_single_slot() {
    let slab = slab_for_class(128);
    assert_eq!(slab.chunk_count(), 0);

    let ptr = slab.allocate(120).unwrap();
    assert_eq!(slab.chunk_count(), 1);
    assert_eq!(slab.live_slots(), 1);

    slab.deallocate(ptr).unwrap();
    assert_eq!(slab.live_slots(), 0);
    // The chunk stays; only the slot is recycled.
    assert_eq!(slab.chunk_count(), 1);
  }

  #[test]
  fn slot_reuse_after_free() {
    let slab = slab_for_class(64);
    let first = slab.allocate(64).unwrap();
    slab.deallocate(first).unwrap();

    let second = slab.allocate(64).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn full_chunk_triggers_growth() {
    let slab = slab_for_class(128);
    let per_chunk = slab.chunk_size() / 128;
    assert_eq!(per_chunk, 32);

    let mut ptrs = Vec::new();
    for _ in 0..per_chunk {
      ptrs.push(slab.allocate(128).unwrap());
    }
    assert_eq!(slab.chunk_count(), 1);

    // One more spills into a second chunk and preserves the first
    // chunk's pointers.
    ptrs.push(slab.allocate(128).unwrap());
    assert_eq!(slab.chunk_count(), 2);
    assert_eq!(slab.live_slots(), per_chunk + 1);

    for ptr in ptrs.iter() {
      let addr = ptr.as_ptr() as usize;
      assert_eq!(addr % 16, 0);
    }

    for ptr in ptrs {
      slab.deallocate(ptr).unwrap();
    }
    assert_eq!(slab.live_slots(), 0);
  }

  #[test]
  fn distinct_slots_never_overlap() {
    let slab = slab_for_class(96);
    let mut ptrs: Vec<usize> = (0..100)
      .map(|_| slab.allocate(80).unwrap().as_ptr() as usize)
      .collect();
    ptrs.sort_unstable();

    for pair in ptrs.windows(2) {
      assert!(pair[0] + 96 <= pair[1]);
    }
  }

  #[test]
  fn unknown_pointer_is_rejected() {
    let slab = slab_for_class(32);
    let _held = slab.allocate(32).unwrap();

    let stack_value = 0u64;
    let foreign = NonNull::from(&stack_value).cast::<u8>();
    assert_eq!(slab.deallocate(foreign), Err(SlabError::UnknownPointer));
    assert_eq!(slab.live_slots(), 1);
  }

  #[test]
  fn interior_pointer_is_rejected() {
    let slab = slab_for_class(64);
    let ptr = slab.allocate(64).unwrap();

    let interior = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(8)) };
    assert_eq!(slab.deallocate(interior), Err(SlabError::UnknownPointer));

    slab.deallocate(ptr).unwrap();
  }

  #[test]
  fn double_free_is_rejected() {
    let slab = slab_for_class(48);
    let ptr = slab.allocate(40).unwrap();

    slab.deallocate(ptr).unwrap();
    assert_eq!(slab.deallocate(ptr), Err(SlabError::SlotAlreadyFree));
    assert_eq!(slab.live_slots(), 0);
  }

  #[test]
  fn availability_tracks_occupancy() {
    let slab = slab_for_class(1024);
    let per_chunk = slab.chunk_size() / 1024;
    assert_eq!(per_chunk, 4);

    let ptrs: Vec<_> = (0..per_chunk).map(|_| slab.allocate(1024).unwrap()).collect();
    assert_eq!(slab.chunk_count(), 1);

    // Chunk is full; freeing one slot must make it available again
    // without growing.
    slab.deallocate(ptrs[2]).unwrap();
    let again = slab.allocate(1024).unwrap();
    assert_eq!(again, ptrs[2]);
    assert_eq!(slab.chunk_count(), 1);
  }
}
