//! Signed counter that releases a waiter whenever it returns to zero.
//!
//! The pools use one as a barrier over in-flight connection tasks: shutdown
//! increments once per task before spawning it, every task decrements once on
//! exit, and `wait` parks the shutting-down caller until the count has drained.
//! The value may transiently go negative when a decrement lands before the
//! matching increment is observed; `wait` treats any non-positive value as
//! drained.
//!
//! 一个有符号计数器，每当回到零时释放等待者。
//!
//! 连接池用它作为在途连接任务的屏障：关闭流程在派生每个任务之前加一，
//! 每个任务退出时减一，`wait` 将正在关闭的调用者挂起，直到计数排空。
//! 当减一先于对应的加一被观察到时，计数值可能短暂为负；`wait` 将任何
//! 非正值视为已排空。

use crate::event::Event;
use crate::shim::atomic::{AtomicIsize, Ordering};

/// Zero-rendezvous task counter.
///
/// 归零会合的任务计数器。
///
/// # Examples
///
/// ```
/// use lite_net::counter::Counter;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let counter = Arc::new(Counter::new());
///
/// counter.add(1);
/// let worker = counter.clone();
/// tokio::spawn(async move {
///     // ... task body ...
///     worker.add(-1);
/// });
///
/// counter.wait().await;
/// # });
/// ```
pub struct Counter {
    value: AtomicIsize,
    zero: Event,
}

impl Counter {
    /// Create a counter starting at zero.
    ///
    /// 创建一个从零开始的计数器。
    pub fn new() -> Self {
        Self {
            value: AtomicIsize::new(0),
            zero: Event::new(),
        }
    }

    /// Add `delta` (which may be negative). A transition **to** zero notifies
    /// the waiter.
    ///
    /// 加上 `delta`（可以为负）。转变**为**零时通知等待者。
    pub fn add(&self, delta: isize) {
        let prev = self.value.fetch_add(delta, Ordering::AcqRel);
        if prev + delta == 0 {
            self.zero.notify();
        }
    }

    /// Current value. May be stale the moment it is read.
    ///
    /// 当前值。读取的瞬间即可能过期。
    #[inline]
    pub fn value(&self) -> isize {
        self.value.load(Ordering::Acquire)
    }

    /// Wait until a non-positive value is observed.
    ///
    /// Returns immediately when the counter is already drained; otherwise
    /// parks on the zero event and re-checks on every wake-up, so a count
    /// that bounces through zero cannot strand the waiter.
    ///
    /// 等待直到观察到非正值。
    ///
    /// 若计数器已排空则立即返回；否则挂起在归零事件上，并在每次被唤醒
    /// 时重新检查，因此计数值即使反复穿过零也不会卡住等待者。
    pub async fn wait(&self) {
        loop {
            if self.value.load(Ordering::Acquire) <= 0 {
                return;
            }
            self.zero.wait().await;
        }
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("value", &self.value())
            .finish()
    }
}
