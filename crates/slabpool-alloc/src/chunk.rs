use core::ptr::NonNull;

use slabpool_bitmap::Bitmap;
use slabpool_sys::{
  GLOBAL_SYSTEM,
  math::is_aligned,
  prim::min_align,
  system::SysError,
};

use crate::slab::{
  SlabError,
  SlabResult,
};

/// One contiguous backing region of a slab, subdivided into equal slots
/// tracked by an occupancy bitmap (bit set = slot allocated).
pub struct Chunk {
  mem: &'static mut [u8],
  occupancy: Bitmap,
  class_size: usize,
}

impl Chunk {
  pub fn new(chunk_size: usize, class_size: usize) -> SlabResult<Self> {
    debug_assert!(class_size >= 16 && class_size % 16 == 0);
    debug_assert!(chunk_size >= class_size);

    let mem = unsafe { GLOBAL_SYSTEM.alloc(chunk_size) }.map_err(SlabError::System)?;
    debug_assert_eq!(
      is_aligned(mem.as_ptr() as usize, min_align()),
      Some(true),
      "chunk base must be min-aligned"
    );

    let slots = chunk_size / class_size;
    Ok(Self {
      mem,
      occupancy: Bitmap::new(slots),
      class_size,
    })
  }

  #[inline(always)]
  pub fn base(&self) -> usize {
    self.mem.as_ptr() as usize
  }

  #[inline(always)]
  pub fn len(&self) -> usize {
    self.mem.len()
  }

  #[inline(always)]
  pub fn slots(&self) -> usize {
    self.occupancy.bits()
  }

  #[inline(always)]
  pub fn occupancy(&self) -> &Bitmap {
    &self.occupancy
  }

  #[inline(always)]
  pub fn contains(&self, addr: usize) -> bool {
    addr >= self.base() && addr < self.base() + self.len()
  }

  /// Slot index of an address inside this chunk, provided it is an exact
  /// slot base.
  pub fn slot_of(&self, addr: usize) -> SlabResult<usize> {
    debug_assert!(self.contains(addr));

    let offset = addr - self.base();
    if offset % self.class_size != 0 {
      return Err(SlabError::UnknownPointer);
    }
    Ok(offset / self.class_size)
  }

  pub fn slot_addr(&self, slot: usize) -> NonNull<u8> {
    debug_assert!(slot < self.slots());

    let addr = self.base() + slot * self.class_size;
    // Slots never leave the chunk: slot < slots() and the chunk length is
    // a whole number of slots.
    unsafe { NonNull::new_unchecked(addr as *mut u8) }
  }
}

impl Drop for Chunk {
  fn drop(&mut self) {
    let result: Result<(), SysError> = unsafe { GLOBAL_SYSTEM.dealloc(self.mem) };
    debug_assert!(result.is_ok());
  }
}
