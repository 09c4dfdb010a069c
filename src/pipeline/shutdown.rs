use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::info;

/// Something a shutdown must wake up, e.g. a queue a thread may be parked on.
pub trait Interruptible: Send + Sync {
    fn interrupt(&self);
}

#[derive(Default)]
struct Inner {
    triggered: AtomicBool,
    targets: Mutex<Vec<Arc<dyn Interruptible>>>,
    done: Mutex<bool>,
    cvar: Condvar,
}

/// One-shot stop flag shared by the UI, capture and processing threads.
///
/// Triggering is idempotent. It flips the atomic flag, interrupts every
/// attached target and releases threads parked in [`wait`](Self::wait).
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt `target` when the signal fires (immediately if it already has).
    pub fn attach(&self, target: Arc<dyn Interruptible>) {
        let mut targets = self.inner.targets.lock();
        if self.is_triggered() {
            drop(targets);
            target.interrupt();
        } else {
            targets.push(target);
        }
    }

    pub fn trigger(&self) {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown requested");

        let targets = std::mem::take(&mut *self.inner.targets.lock());
        for target in targets {
            target.interrupt();
        }

        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Block until triggered.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.cvar.wait(&mut done);
        }
    }

    /// Block until triggered or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.inner.done.lock();
        while !*done {
            if self.inner.cvar.wait_until(&mut done, deadline).timed_out() {
                break;
            }
        }
        *done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Interruptible for Counter {
        fn interrupt(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn trigger_interrupts_targets_once() {
        let signal = ShutdownSignal::new();
        let target = Arc::new(Counter::default());
        signal.attach(target.clone());

        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_attach_is_interrupted_immediately() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let target = Arc::new(Counter::default());
        signal.attach(target.clone());
        assert_eq!(target.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_returns_after_trigger_from_another_thread() {
        let signal = ShutdownSignal::new();
        let remote = signal.clone();
        let ui = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.trigger();
        });
        signal.wait();
        ui.join().unwrap();
        assert!(signal.is_triggered());
    }

    #[test]
    fn wait_timeout_reports_quiet_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
        signal.trigger();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
    }
}
