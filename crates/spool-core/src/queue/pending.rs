//! FIFO of tasks waiting for a free worker.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Pending queue.
///
/// Design:
/// - 共有参照（`Arc`）だけを持つ。正はあくまで registry
/// - ロックは push/pop の間だけ。await をまたいで保持しない
/// - リトライも末尾に積む（初回実行待ちのタスクを追い越さない）
pub struct PendingQueue<T> {
    ready: Mutex<VecDeque<Arc<T>>>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Arc<T>) {
        self.ready.lock().push_back(task);
    }

    pub fn pop(&self) -> Option<Arc<T>> {
        self.ready.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }

    /// Drop every queued entry for which `keep` returns `false`.
    /// Returns how many entries were removed.
    pub fn retain(&self, mut keep: impl FnMut(&Arc<T>) -> bool) -> usize {
        let mut ready = self.ready.lock();
        let before = ready.len();
        ready.retain(|task| keep(task));
        before - ready.len()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
