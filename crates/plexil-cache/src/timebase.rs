//! [`Timebase`]: monotonic wall time plus a one-shot deadline wakeup or a
//! fixed-tick wakeup, per §4.E.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{CacheError, Result};

/// Called from whatever thread owns the platform timer; the exec side is
/// expected to treat it purely as a nudge and re-read [`now_seconds`]
/// rather than trust any timestamp implied by the call, per §5.
pub type WakeupFn = Arc<dyn Fn() + Send + Sync>;

/// POSIX wall-clock seconds. This is the kernel's only notion of "now";
/// resolution is whatever the platform clock gives us, which on every
/// target this crate supports is well under a microsecond.
pub fn now_seconds() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    /// Interval in microseconds; `0` denotes deadline mode (§4.E).
    Tick(u64),
    Deadline,
}

/// A single timebase instance. At most one is meant to be active per
/// process (§4.E); [`Timebase::install`] / [`Timebase::current`] provide
/// the static accessor the spec calls for, so code far from the owner
/// (e.g. a `LookupOnChange` computing a deadline) can still call
/// [`now_seconds`] without threading a reference through.
pub struct Timebase {
    wakeup: WakeupFn,
    mode: Mode,
    running: bool,
    next_wakeup: Option<f64>,
    /// Bumped on every `start`/`stop`/`setTimer` so an in-flight sleep task
    /// from a superseded call can recognize it's stale and exit quietly
    /// instead of firing a wakeup nobody asked for anymore.
    epoch: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

static CURRENT: OnceLock<Arc<AsyncMutex<Timebase>>> = OnceLock::new();

impl Timebase {
    pub fn new(wakeup: WakeupFn) -> Self {
        Timebase {
            wakeup,
            mode: Mode::Deadline,
            running: false,
            next_wakeup: None,
            epoch: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Registers `self` as the process-wide timebase, returning a shared
    /// handle. Only meaningful to call once; a second call replaces the
    /// accessor but does not stop the previous instance's background task.
    pub fn install(self) -> Arc<AsyncMutex<Timebase>> {
        let shared = Arc::new(AsyncMutex::new(self));
        let _ = CURRENT.set(shared.clone());
        shared
    }

    pub fn current() -> Option<Arc<AsyncMutex<Timebase>>> {
        CURRENT.get().cloned()
    }

    /// Must be called before [`Self::start`]; a positive `interval_usec`
    /// selects tick mode, `0` selects deadline mode.
    pub fn set_tick_interval(&mut self, interval_usec: u64) -> Result<()> {
        if self.running {
            return Err(CacheError::TimebaseUsage(
                "setTickInterval called after start".into(),
            ));
        }
        self.mode = if interval_usec == 0 { Mode::Deadline } else { Mode::Tick(interval_usec) };
        Ok(())
    }

    pub fn get_tick_interval(&self) -> u64 {
        match self.mode {
            Mode::Tick(usec) => usec,
            Mode::Deadline => 0,
        }
    }

    pub fn get_time(&self) -> f64 {
        now_seconds()
    }

    pub fn get_next_wakeup(&self) -> Option<f64> {
        self.next_wakeup
    }

    /// Idempotent. In tick mode, begins invoking the wakeup function
    /// repeatedly at the configured interval.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Mode::Tick(usec) = self.mode {
            self.spawn_tick_loop(usec);
        }
    }

    /// Guarantees no further wakeups after it returns (§4.E): bumps the
    /// epoch so any in-flight sleep task becomes a no-op, then drops the
    /// task handle.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.next_wakeup = None;
    }

    /// Deadline mode only: schedules a one-shot wakeup at `deadline`
    /// (POSIX seconds). A usage error outside `start`/`stop`; silently
    /// ignored in tick mode; a deadline already in the past fires
    /// immediately and synchronously, leaving `next_wakeup = 0`.
    pub fn set_timer(&mut self, deadline: f64) -> Result<()> {
        if !self.running {
            return Err(CacheError::TimebaseUsage(
                "setTimer called before start or after stop".into(),
            ));
        }
        if matches!(self.mode, Mode::Tick(_)) {
            trace!("setTimer ignored in tick mode");
            return Ok(());
        }

        let now = now_seconds();
        if deadline <= now {
            (self.wakeup)();
            self.next_wakeup = Some(0.0);
            return Ok(());
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        let my_epoch = self.epoch.load(Ordering::SeqCst);
        self.next_wakeup = Some(deadline);

        let wakeup = self.wakeup.clone();
        let epoch = self.epoch.clone();
        let delay = Duration::from_secs_f64((deadline - now).max(0.0));
        if let Some(old) = self.task.take() {
            old.abort();
        }
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if epoch.load(Ordering::SeqCst) == my_epoch {
                wakeup();
            }
        }));
        Ok(())
    }

    fn spawn_tick_loop(&mut self, interval_usec: u64) {
        let wakeup = self.wakeup.clone();
        let epoch = self.epoch.clone();
        let my_epoch = epoch.load(Ordering::SeqCst);
        let interval = Duration::from_micros(interval_usec);
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if epoch.load(Ordering::SeqCst) != my_epoch {
                    return;
                }
                wakeup();
            }
        }));
    }
}

impl Drop for Timebase {
    fn drop(&mut self) {
        if self.running {
            warn!("Timebase dropped without stop(); any pending wakeup task is aborted");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn deadline_in_the_past_fires_synchronously() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let mut tb = Timebase::new(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        tb.start();
        tb.set_timer(now_seconds() - 1.0).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(tb.get_next_wakeup(), Some(0.0));
    }

    #[tokio::test]
    async fn set_timer_before_start_is_a_usage_error() {
        let mut tb = Timebase::new(Arc::new(|| {}));
        assert!(tb.set_timer(now_seconds() + 1.0).is_err());
    }

    #[tokio::test]
    async fn tick_mode_ignores_set_timer() {
        let mut tb = Timebase::new(Arc::new(|| {}));
        tb.set_tick_interval(1000).unwrap();
        tb.start();
        assert!(tb.set_timer(now_seconds() + 5.0).is_ok());
        assert!(tb.get_next_wakeup().is_none());
    }

    /// §8 scenario 6: tick mode at a 100ms interval fires exactly 5 times
    /// over 0.5s of (virtual, paused) time and no more.
    #[tokio::test(start_paused = true)]
    async fn tick_mode_fires_exactly_five_times_over_half_a_second() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let mut tb = Timebase::new(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        tb.set_tick_interval(100_000).unwrap();
        tb.start();
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(100)).await;
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 5);
        tb.stop();
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 5, "stop() must prevent further wakeups");
    }

    #[tokio::test]
    async fn stop_prevents_pending_wakeup() {
        let fired = Arc::new(AtomicU32::new(0));
        let f = fired.clone();
        let mut tb = Timebase::new(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        tb.start();
        tb.set_timer(now_seconds() + 60.0).unwrap();
        tb.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
