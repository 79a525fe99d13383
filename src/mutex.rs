//! FIFO-fair async mutex.
//!
//! Guards the pool state (connection table, cleanup list) on both the client
//! and the server. Contended acquirers suspend instead of spinning, and the
//! lock is granted strictly in suspension order: a task that starts waiting
//! first acquires first, and a fresh caller cannot barge past a parked one.
//! The guard may be held across `.await` points (the pools hold it while
//! joining exited connection tasks).
//!
//! Waiter bookkeeping lives under a short internal lock that is only ever
//! held for a few loads and stores, never across a suspension, and wake-ups
//! are dispatched after that lock is released.
//!
//! FIFO 公平的异步互斥锁。
//!
//! 在客户端和服务端守护池状态（连接表、清理列表）。竞争的获取者挂起
//! 而不是自旋，并且严格按挂起顺序授予锁：先开始等待的任务先获得锁，
//! 新来的调用者无法插队越过已挂起者。守卫可以跨 `.await` 点持有
//! （池在 join 已退出的连接任务时持有它）。
//!
//! 等待者登记保存在一个短暂的内部锁下，该锁只为少量读写持有，
//! 绝不跨越挂起；唤醒在释放该锁之后派发。

use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::shim::cell::UnsafeCell;

struct State {
    locked: bool,
    /// Parked acquirers in suspension order, keyed by ticket.
    ///
    /// 按挂起顺序排列的已挂起获取者，以票号为键。
    waiters: VecDeque<(u64, Waker)>,
    next_ticket: u64,
}

/// Async mutex with FIFO grant order.
///
/// FIFO 授予顺序的异步互斥锁。
///
/// # Examples
///
/// ```
/// use lite_net::mutex::Mutex;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let shared = Arc::new(Mutex::new(0u32));
///
/// let m = shared.clone();
/// let task = tokio::spawn(async move {
///     *m.lock().await += 1;
/// });
///
/// *shared.lock().await += 1;
/// task.await.unwrap();
/// assert_eq!(*shared.lock().await, 2);
/// # });
/// ```
pub struct Mutex<T> {
    state: crate::shim::sync::Mutex<State>,
    value: UnsafeCell<T>,
}

// SAFETY: the value is only reachable through a guard, and guard creation is
// serialized by the locked flag.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create an unlocked mutex holding `value`.
    ///
    /// 创建一个持有 `value` 的未上锁互斥锁。
    pub fn new(value: T) -> Self {
        Self {
            state: crate::shim::sync::Mutex::new(State {
                locked: false,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquire the lock, suspending while it is held elsewhere.
    ///
    /// 获取锁，在他处持有期间挂起。
    #[inline]
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            ticket: None,
        }
    }

    /// Acquire the lock only if it is free and uncontended.
    ///
    /// 仅当锁空闲且无竞争时获取。
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state_lock();
        if !state.locked && state.waiters.is_empty() {
            state.locked = true;
            drop(state);
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    fn state_lock(&self) -> crate::shim::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mutex state lock poisoned")
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("value", &*guard),
            None => s.field("value", &"<locked>"),
        }
        .finish()
    }
}

/// Future returned by [`Mutex::lock`].
///
/// [`Mutex::lock`] 返回的 future。
pub struct Lock<'a, T> {
    mutex: &'a Mutex<T>,
    /// `Some` while parked in the waiter FIFO.
    ///
    /// 在等待者 FIFO 中挂起期间为 `Some`。
    ticket: Option<u64>,
}

impl<'a, T> Future for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.mutex.state_lock();

        match self.ticket {
            None => {
                if !state.locked && state.waiters.is_empty() {
                    // Fast path: free and nobody queued ahead of us.
                    // 快速路径：锁空闲且无人排在我们前面。
                    state.locked = true;
                    drop(state);
                    Poll::Ready(MutexGuard { mutex: self.mutex })
                } else {
                    let ticket = state.next_ticket;
                    state.next_ticket += 1;
                    state.waiters.push_back((ticket, cx.waker().clone()));
                    drop(state);
                    self.ticket = Some(ticket);
                    Poll::Pending
                }
            }
            Some(ticket) => {
                let at_front = state.waiters.front().map(|(id, _)| *id) == Some(ticket);
                if !state.locked && at_front {
                    state.waiters.pop_front();
                    state.locked = true;
                    drop(state);
                    self.ticket = None;
                    Poll::Ready(MutexGuard { mutex: self.mutex })
                } else {
                    // Refresh our parked waker; only the front waiter is
                    // woken on release, so ours must stay current.
                    // 刷新挂起的 waker；释放时只唤醒队首等待者，
                    // 因此我们的 waker 必须保持最新。
                    if let Some(entry) =
                        state.waiters.iter_mut().find(|(id, _)| *id == ticket)
                    {
                        entry.1 = cx.waker().clone();
                    }
                    Poll::Pending
                }
            }
        }
    }
}

impl<T> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        // A cancelled acquire must leave the FIFO, and if the lock is free
        // (its release already woke us) the baton passes to the new front.
        //
        // 被取消的获取必须离开 FIFO；若锁已空闲（其释放已唤醒了我们），
        // 则接力棒传给新的队首。
        if let Some(ticket) = self.ticket {
            let next = {
                let mut state = self.mutex.state_lock();
                if let Some(pos) = state.waiters.iter().position(|(id, _)| *id == ticket) {
                    let _ = state.waiters.remove(pos);
                }
                if !state.locked {
                    state.waiters.front().map(|(_, waker)| waker.clone())
                } else {
                    None
                }
            };
            if let Some(waker) = next {
                waker.wake();
            }
        }
    }
}

/// RAII guard; releasing it wakes the longest-waiting acquirer.
///
/// RAII 守卫；释放时唤醒等待最久的获取者。
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

// SAFETY: holding the guard is exclusive access to the value; sending the
// guard moves that access with it.
unsafe impl<T: Send> Send for MutexGuard<'_, T> {}
unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the locked flag guarantees exclusive access.
        self.mutex.value.with(|ptr| unsafe { &*ptr })
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the locked flag guarantees exclusive access.
        self.mutex.value.with_mut(|ptr| unsafe { &mut *ptr })
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        let next = {
            let mut state = self.mutex.state_lock();
            state.locked = false;
            state.waiters.front().map(|(_, waker)| waker.clone())
        };
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn test_lock_uncontended() {
        let mutex = Mutex::new(5);
        {
            let mut guard = mutex.lock().await;
            *guard += 1;
        }
        assert_eq!(*mutex.lock().await, 6);
    }

    #[tokio::test]
    async fn test_try_lock() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let mutex = Arc::new(Mutex::new(0u64));
        let mut tasks = Vec::new();

        for _ in 0..8 {
            let m = mutex.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let mut guard = m.lock().await;
                    let v = *guard;
                    tokio::task::yield_now().await;
                    *guard = v + 1;
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*mutex.lock().await, 800);
    }

    #[tokio::test]
    async fn test_fifo_grant_order() {
        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let held = mutex.lock().await;

        let mut tasks = Vec::new();
        for i in 0..3u32 {
            let m = mutex.clone();
            let o = order.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = m.lock().await;
                o.lock().unwrap().push(i);
            }));
            // Generous gap so suspension order matches spawn order.
            sleep(Duration::from_millis(20)).await;
        }

        drop(held);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_no_barging_past_parked_waiter() {
        let mutex = Arc::new(Mutex::new(()));

        let held = mutex.lock().await;

        let m = mutex.clone();
        let waiter = tokio::spawn(async move {
            let _guard = m.lock().await;
        });
        sleep(Duration::from_millis(20)).await;

        // The lock is still held, and even once released the parked waiter
        // must be ahead of a fresh try_lock.
        assert!(mutex.try_lock().is_none());
        drop(held);
        sleep(Duration::from_millis(5)).await;

        waiter.await.unwrap();
        assert!(mutex.try_lock().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_passes_baton() {
        let mutex = Arc::new(Mutex::new(()));

        let held = mutex.lock().await;

        // First waiter parks, then is cancelled.
        let m = mutex.clone();
        let cancelled = tokio::spawn(async move {
            let _guard = m.lock().await;
            // Held until aborted.
            sleep(Duration::from_secs(60)).await;
        });
        sleep(Duration::from_millis(10)).await;
        cancelled.abort();
        let _ = cancelled.await;

        // Second waiter parks behind the corpse.
        let m = mutex.clone();
        let waiter = tokio::spawn(async move {
            let _guard = m.lock().await;
        });
        sleep(Duration::from_millis(10)).await;

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must acquire after cancellation")
            .unwrap();
    }
}
