//! The settings-driven log-writer worker thread.
//!
//! Reserved by `loggerThread = true`. The loop currently only ticks; the
//! completion pass stays on the present path. Kept so deployments that
//! configure the thread get the same lifecycle (spawn at init, cooperative
//! stop and join at teardown) once work migrates onto it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Work can build up across threads at sub-microsecond granularity; a
/// short tick keeps the wake-up latency bounded without spinning.
const IDLE_TICK: Duration = Duration::from_micros(50);

pub struct LogWriterThread {
    active: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LogWriterThread {
    pub fn spawn() -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = Arc::clone(&active);

        let handle = std::thread::Builder::new()
            .name("gpu-voyeur-log-writer".to_owned())
            .spawn(move || {
                while thread_active.load(Ordering::Acquire) {
                    std::thread::sleep(IDLE_TICK);
                }
            });

        match handle {
            Ok(handle) => Self {
                active,
                handle: Some(handle),
            },
            Err(err) => {
                log::error!("spawning log-writer thread failed: {err}");
                Self {
                    active,
                    handle: None,
                }
            }
        }
    }

    /// Signals the loop to exit and joins it.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogWriterThread {
    fn drop(&mut self) {
        self.stop();
    }
}
