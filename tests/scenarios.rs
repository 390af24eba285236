//! End-to-end exercises of the pool, the lock and the observer working
//! together, including the multi-threaded churn runs.

use std::{
  collections::HashSet,
  sync::Arc,
  thread,
  time::{
    Duration,
    Instant,
  },
};

use rand::Rng;
use slabpool::{
  LifetimeObserver,
  Pool,
  PoolError,
  SpinLock,
};

#[test]
fn single_small_allocation() {
  let pool = Pool::new();

  let ptr = pool.allocate(120, 8).unwrap();
  unsafe { core::ptr::write_bytes(ptr.as_ptr(), 0xAB, 120) };
  let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), 120) };
  assert!(bytes.iter().all(|&b| b == 0xAB));

  pool.deallocate(ptr.as_ptr()).unwrap();

  // The freed slot is the first candidate for the next fit.
  let again = pool.allocate(120, 8).unwrap();
  assert_eq!(again, ptr);
  pool.deallocate(again.as_ptr()).unwrap();
}

#[test]
fn chunk_growth_preserves_existing_pointers() {
  let pool = Pool::new();

  // 120 + 8 header = 128 total; 32 slots per 4 KiB chunk, so 33
  // allocations force a second chunk.
  let ptrs: Vec<_> = (0..33).map(|_| pool.allocate(120, 8).unwrap()).collect();

  let stats = pool.stats();
  let class = stats.class(128).unwrap();
  assert_eq!(class.chunks, 2);
  assert_eq!(class.live_slots, 33);

  let mut addrs: Vec<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
  addrs.sort_unstable();
  for pair in addrs.windows(2) {
    assert!(pair[0] + 120 <= pair[1], "user ranges overlap");
  }
  for &addr in addrs.iter() {
    assert_eq!(addr % 8, 0);
  }

  // Growth must not have moved anything: every pointer still reads back
  // what was written through it.
  for (i, ptr) in ptrs.iter().enumerate() {
    unsafe { ptr.as_ptr().write(i as u8) };
  }
  for (i, ptr) in ptrs.iter().enumerate() {
    assert_eq!(unsafe { ptr.as_ptr().read() }, i as u8);
  }

  for ptr in ptrs {
    pool.deallocate(ptr.as_ptr()).unwrap();
  }
  assert_eq!(pool.stats().total_live(), 0);
}

#[test]
fn mixed_size_round_trip_reuses_chunks() {
  let sizes = [
    16usize, 32, 48, 64, 96, 128, 192, 256, 384, 512, 768, 1024, 1500, 2000, 8000,
  ];
  let pool = Pool::new();

  let ptrs: Vec<_> = sizes
    .iter()
    .map(|&s| pool.allocate(s, 8).unwrap())
    .collect();
  let chunks_after_first_round = pool.stats().total_chunks();

  for ptr in ptrs.into_iter().rev() {
    pool.deallocate(ptr.as_ptr()).unwrap();
  }
  assert_eq!(pool.stats().total_live(), 0);

  // The second round fits entirely in the chunks the first round grew.
  let ptrs: Vec<_> = sizes
    .iter()
    .map(|&s| pool.allocate(s, 8).unwrap())
    .collect();
  assert_eq!(pool.stats().total_chunks(), chunks_after_first_round);

  for ptr in ptrs {
    pool.deallocate(ptr.as_ptr()).unwrap();
  }
}

#[test]
fn concurrent_contention() {
  const THREADS: usize = 8;
  const ROUNDS: usize = 10_000;

  let pool = Pool::new();

  thread::scope(|scope| {
    for _ in 0..THREADS {
      scope.spawn(|| {
        let mut rng = rand::rng();
        let mut held = Vec::with_capacity(ROUNDS);

        for _ in 0..ROUNDS {
          let size = rng.random_range(16..=1016);
          let ptr = pool.allocate(size, 8).unwrap();
          // Touch the first byte to make sure the slot is really ours.
          unsafe { ptr.as_ptr().write(0xEE) };
          held.push(ptr);
        }
        for ptr in held {
          pool.deallocate(ptr.as_ptr()).unwrap();
        }
      });
    }
  });

  let stats = pool.stats();
  assert_eq!(stats.total_live(), 0);
  // Chunks remain only for what the peak live set needed.
  assert!(stats.total_chunks() > 0);
}

#[test]
fn concurrent_pointers_are_disjoint() {
  const THREADS: usize = 4;
  const PER_THREAD: usize = 500;

  let pool = Pool::new();

  let all: Vec<usize> = thread::scope(|scope| {
    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        scope.spawn(|| {
          (0..PER_THREAD)
            .map(|_| pool.allocate(56, 8).unwrap().as_ptr() as usize)
            .collect::<Vec<_>>()
        })
      })
      .collect();

    handles
      .into_iter()
      .flat_map(|h| h.join().unwrap())
      .collect()
  });

  let unique: HashSet<usize> = all.iter().copied().collect();
  assert_eq!(unique.len(), THREADS * PER_THREAD);

  for addr in all {
    pool.deallocate(addr as *mut u8).unwrap();
  }
  assert_eq!(pool.stats().total_live(), 0);
}

#[test]
fn async_callback_observes_destruction() {
  struct Worker {
    alive: LifetimeObserver,
    result: u64,
  }

  let worker = Box::new(Worker {
    alive: LifetimeObserver::new(),
    result: 99,
  });

  // The callback captures a liveness observer and a raw reference, the
  // situation an event loop leaves a handler in after its target dies.
  let watcher = worker.alive.observer();
  let raw: *const Worker = &*worker;
  let callback = move || {
    if watcher.is_alive() {
      Some(unsafe { (*raw).result })
    } else {
      None
    }
  };

  drop(worker);
  assert_eq!(callback(), None);
}

#[test]
fn spinlock_backoff_under_long_hold() {
  let lock = Arc::new(SpinLock::new(0u32));

  let guard = lock.lock();
  let contender = {
    let lock = Arc::clone(&lock);
    thread::spawn(move || {
      let started = Instant::now();
      *lock.lock() += 1;
      started.elapsed()
    })
  };

  thread::sleep(Duration::from_millis(100));
  drop(guard);
  let waited = contender.join().unwrap();

  assert!(waited >= Duration::from_millis(50));
  *lock.lock() += 1;
  assert_eq!(*lock.lock(), 2);
}

#[test]
fn rejects_out_of_range_and_bad_alignment() {
  let pool = Pool::new();

  assert!(matches!(
    pool.allocate(1 << 31, 8),
    Err(PoolError::OutOfRange(_))
  ));
  assert!(matches!(
    pool.allocate(64, 32),
    Err(PoolError::InvalidArgument(_))
  ));
}

#[test]
fn deallocate_null_is_noop() {
  let pool = Pool::new();
  pool.deallocate(core::ptr::null_mut()).unwrap();
}
