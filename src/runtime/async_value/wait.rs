use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use super::AsyncValue;
use crate::error::JitError;

/// Runs `f` exactly once, after every value in `values` is available.
///
/// Runs inline when nothing is pending; otherwise on the thread that resolves
/// the last pending value.
pub fn run_when_ready<T, F>(values: &[AsyncValue<T>], f: F)
where
    T: Send + Sync + 'static,
    F: FnOnce() + Send + 'static,
{
    let pending: Vec<&AsyncValue<T>> = values.iter().filter(|v| !v.is_available()).collect();
    if pending.is_empty() {
        f();
        return;
    }

    let remaining = Arc::new(AtomicUsize::new(pending.len()));
    let callback = Arc::new(Mutex::new(Some(f)));
    for value in pending {
        let remaining = Arc::clone(&remaining);
        let callback = Arc::clone(&callback);
        value.and_then(move || {
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(f) = callback.lock().take() {
                    f();
                }
            }
        });
    }
}

/// Completion flag shared between a blocked thread and a continuation.
#[derive(Debug, Default)]
struct ReadySignal {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl ReadySignal {
    fn mark_ready(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        self.condvar.notify_all();
    }

    fn wait_blocking(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.condvar.wait(&mut ready);
        }
    }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
    /// Blocks the calling thread until the value is available.
    ///
    /// The runtime itself never calls this; it exists for callers at the edge
    /// of an asynchronous program, and for tests.
    pub fn wait(&self) -> Result<&T, &JitError> {
        if !self.is_available() {
            let signal = Arc::new(ReadySignal::default());
            let notify = Arc::clone(&signal);
            self.and_then(move || notify.mark_ready());
            signal.wait_blocking();
        }
        match self.get() {
            Some(result) => result,
            None => unreachable!("async value signalled ready while unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn runs_after_all_values_resolve() {
        let values: Vec<AsyncValue<u32>> = (0..3).map(|_| AsyncValue::pending()).collect();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        run_when_ready(&values, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        values[0].set_value(0);
        values[2].set_error(JitError::execution("failed"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        values[1].set_value(1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runs_inline_when_nothing_is_pending() {
        let values = vec![AsyncValue::ready(1), AsyncValue::ready(2)];
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        run_when_ready(&values, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_blocks_until_another_thread_resolves() {
        let value = AsyncValue::<String>::pending();
        let producer = value.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_value("ready".to_string());
        });
        assert_eq!(value.wait().map(String::as_str), Ok("ready"));
        handle.join().unwrap();
    }
}
