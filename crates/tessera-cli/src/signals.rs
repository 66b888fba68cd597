//! SIGINT/SIGTERM handling without the ctrlc crate.
//!
//! The first signal raises the stop flag and lets the run drain; a second one
//! within [`FORCE_WINDOW_MS`] exits on the spot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

const FORCE_WINDOW_MS: u64 = 2_000;

static STOP: OnceLock<Arc<AtomicBool>> = OnceLock::new();
static EPOCH: OnceLock<Instant> = OnceLock::new();
/// Milliseconds since `EPOCH` of the last signal, plus one; 0 = none yet.
static LAST_SIGNAL: AtomicU64 = AtomicU64::new(0);

#[cfg(unix)]
extern "C" fn on_signal(_: libc::c_int) {
    let Some(epoch) = EPOCH.get() else {
        return;
    };
    let now = epoch.elapsed().as_millis() as u64 + 1;
    let last = LAST_SIGNAL.swap(now, Ordering::SeqCst);
    if last != 0 && now - last < FORCE_WINDOW_MS {
        // SAFETY: _exit is async-signal-safe.
        unsafe { libc::_exit(130) };
    }
    if let Some(stop) = STOP.get() {
        stop.store(true, Ordering::Release);
    }
}

/// Route SIGINT and SIGTERM to `stop`. Only the first call takes effect.
pub fn install(stop: Arc<AtomicBool>) {
    EPOCH.get_or_init(Instant::now);
    if STOP.set(stop).is_err() {
        return;
    }
    #[cfg(unix)]
    {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only touches atomics and calls _exit.
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }
}
