use slabpool_sys::system::SysError;
use thiserror::Error;

use crate::{
  large::LargeError,
  slab::SlabError,
};

/// User-visible failures of the pool.
///
/// Internal invariant violations are not represented here; they assert in
/// debug builds and are assumed in release builds.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),
  #[error("request out of range: {0}")]
  OutOfRange(&'static str),
  #[error("system allocator refused the request")]
  OutOfMemory,
}

pub type PoolResult<T> = Result<T, PoolError>;

impl From<SysError> for PoolError {
  fn from(err: SysError) -> Self {
    match err {
      SysError::OutOfMemory => PoolError::OutOfMemory,
      SysError::Unsupported | SysError::InvalidArgument => {
        PoolError::InvalidArgument("system allocator rejected the request")
      }
    }
  }
}

impl From<SlabError> for PoolError {
  fn from(err: SlabError) -> Self {
    match err {
      SlabError::UnknownPointer => {
        PoolError::InvalidArgument("pointer does not belong to this slab")
      }
      SlabError::SlotAlreadyFree => PoolError::InvalidArgument("double free"),
      SlabError::ChunkLimit => PoolError::OutOfRange("class reached its chunk cap"),
      SlabError::System(sys) => sys.into(),
    }
  }
}

impl From<LargeError> for PoolError {
  fn from(err: LargeError) -> Self {
    match err {
      LargeError::OutOfRange => PoolError::OutOfRange("request exceeds the large-backend limit"),
      LargeError::System(sys) => sys.into(),
    }
  }
}
