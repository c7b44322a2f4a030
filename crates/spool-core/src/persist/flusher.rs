//! Debounced flush scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Coalesces flush requests.
///
/// # 方針
/// 「最後の変更から N 秒」ではなく「最初の変更から N 秒」の窓にしている。
/// 変更が途切れなくても窓ごとに 1 回は必ず書き出される。
///
/// The first request after a flush opens a window of `debounce`; every
/// request arriving inside the window is absorbed, and one flush runs when
/// the window closes. A steady stream of requests therefore produces at most
/// one flush per window instead of postponing it forever.
pub(crate) struct Flusher {
    dirty: AtomicBool,
    notify: Notify,
    debounce: Duration,
}

impl Flusher {
    pub(crate) fn new(debounce: Duration) -> Self {
        Self {
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
            debounce,
        }
    }

    /// Mark the snapshot stale and wake the loop. Never blocks.
    pub(crate) fn request(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        // notify_one stores a permit when nobody waits, so no wake-up is lost
        self.notify.notify_one();
    }

    /// Clear the stale mark, returning whether it was set.
    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    /// Flush loop. `flush` returns `false` once its owner is gone.
    pub(crate) async fn run(&self, shutdown: CancellationToken, mut flush: impl FnMut() -> bool) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.notify.notified() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.debounce) => {}
            }
            if self.take_dirty() && !flush() {
                return;
            }
        }
    }
}
