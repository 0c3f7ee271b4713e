//! Fixed-size worker pool over a pre-computed work list

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Runs a job over every item of a slice on `workers` threads
///
/// Workers pull the next index from a shared cursor. After the first failure no
/// new items are dispatched; items already running finish, then the first error
/// is returned.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// `workers == 0` runs sequentially on the calling thread
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn run<T, E, F>(&self, items: &[T], job: F) -> Result<(), E>
    where
        T: Sync,
        E: Send,
        F: Fn(&T) -> Result<(), E> + Sync,
    {
        if self.workers == 0 || items.len() <= 1 {
            return items.iter().try_for_each(&job);
        }

        let cursor = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let first_error: Mutex<Option<E>> = Mutex::new(None);
        let threads = self.workers.min(items.len());

        let scope_result = crossbeam::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|_| loop {
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    if let Err(e) = job(item) {
                        abort.store(true, Ordering::SeqCst);
                        let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                });
            }
        });

        if let Err(panic) = scope_result {
            std::panic::resume_unwind(panic);
        }

        match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
