pub mod chunk;
pub mod classes;
pub mod error;
pub mod header;
pub mod large;
pub mod pool;
pub mod slab;

pub use error::{
  PoolError,
  PoolResult,
};
pub use pool::{
  ClassStats,
  Pool,
  PoolStats,
};

pub mod config {
  /// Size classes served by the slab engine, in bytes. Every class is a
  /// multiple of 16; totals above the last entry route to the large
  /// backend.
  pub const CLASS_LADDER: [usize; NCLASSES] = [
    16, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024,
  ];

  pub const NCLASSES: usize = 12;

  /// Largest total size served from a slab.
  pub const SMALL_CUTOFF: usize = 1024;

  /// Backing-region size for classes up to `SMALL_CUTOFF`.
  pub const SMALL_CHUNK_SIZE: usize = 4096;

  /// Classes above this get chunks sized as a multiple of the class.
  pub const LARGE_CLASS_FLOOR: usize = 2048;
  pub const LARGE_CHUNK_MULTIPLIER: usize = 4;

  /// Hard cap on backing memory per class.
  pub const CLASS_BYTE_CAP: usize = 4 << 30;

  /// Upper bound on a single allocation, header included.
  pub const ALLOC_LIMIT: usize = 1 << 30;

  /// Header size bounds; the header is `max(HEADER_MIN, alignment)`.
  pub const HEADER_MIN: usize = 8;
  pub const HEADER_MAX: usize = 16;

  /// Alignments the pool accepts.
  pub const SUPPORTED_ALIGNMENTS: [usize; 3] = [4, 8, 16];
}
