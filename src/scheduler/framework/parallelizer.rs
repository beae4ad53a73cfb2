use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Default number of workers a framework uses to fan out plugin calls.
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Latching holder for the first error reported by a group of parallel
/// workers. Later raises are discarded; the winner among simultaneous racers
/// is unspecified. Reading lowers the flag.
pub struct ErrorFlag<E> {
    slot: Mutex<Option<E>>,
}

impl<E> Default for ErrorFlag<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ErrorFlag<E> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn raise(&self, err: E) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn lower(&self) -> Option<E> {
        self.slot.lock().unwrap().take()
    }
}

/// Bounded worker pool that applies a work function to each index of a fixed
/// range. Each index is executed at most once; cancellation stops dispatch of
/// not-yet-started pieces, and running pieces are expected to observe it
/// cooperatively.
pub struct Parallelizer {
    num_workers: usize,
}

impl Parallelizer {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    pub async fn parallelize<F>(
        &self,
        token: &CancellationToken,
        pieces: usize,
        work: F,
        name: &str,
    ) where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if pieces == 0 {
            return;
        }
        let work = Arc::new(work);
        let next = Arc::new(AtomicUsize::new(0));
        let workers = self.num_workers.min(pieces);
        trace!(task = name, pieces, workers, "parallelizing");

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let work = work.clone();
            let next = next.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        return;
                    }
                    let piece = next.fetch_add(1, Ordering::Relaxed);
                    if piece >= pieces {
                        return;
                    }
                    work(piece);
                }
            }));
        }
        for handle in handles {
            // A crashing worker is a programming error; surface it.
            handle.await.expect("parallelizer worker panicked");
        }
    }
}
