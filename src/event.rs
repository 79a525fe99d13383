//! Single-slot park/notify rendezvous between one waiter and one notifier.
//!
//! `Event` is the framework's suspension primitive: a connection parks its
//! reader loop on one while waiting for shutdown, and the task counter parks
//! its waiter on one while connections drain. A notify delivered before the
//! wait is latched and consumed by the next wait, so the notification cannot
//! be lost to a race.
//!
//! The latch is a plain atomic flag; the parked waker lives under the same
//! short-lock discipline as the write queue and the async mutex: the lock is
//! held for a few statements, never across a suspension, and wake-ups are
//! dispatched after it is released. `notify` latches while holding the lock,
//! and a registering waiter re-checks the latch while holding it, which is
//! what rules out the park-after-notify lost wakeup.
//!
//! At most **one** task may wait at a time; the socket runtime guarantees
//! this by construction (one reader loop, one barrier waiter per pool).
//!
//! 单槽位的挂起/通知会合点，恰好一个等待者和一个通知者。
//!
//! `Event` 是框架的挂起原语：连接在等待关闭时将其读循环挂起在一个
//! `Event` 上，任务计数器在连接排空时将其等待者挂起在一个 `Event` 上。
//! 在等待之前送达的通知会被锁存并由下一次等待消费，因此通知不会因
//! 竞争而丢失。
//!
//! 锁存是一个普通的原子标志；挂起的 waker 保存在与写队列、异步互斥锁
//! 相同的短锁纪律之下：锁只为少量语句持有，绝不跨越挂起，唤醒在释放
//! 之后派发。`notify` 在持锁期间锁存，注册中的等待者也在持锁期间复查
//! 锁存，正是这一点排除了先通知后挂起的唤醒丢失。
//!
//! 任意时刻最多只能有**一个**任务等待；套接字运行时在结构上保证了
//! 这一点（每个连接一个读循环，每个池一个屏障等待者）。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use crate::shim::atomic::{AtomicBool, Ordering};
use crate::shim::sync::{Mutex, MutexGuard};

/// Single-waiter event with a latched notify.
///
/// 带锁存通知的单等待者事件。
///
/// # Examples
///
/// ```
/// use lite_net::event::Event;
///
/// # tokio_test::block_on(async {
/// let shutdown = Event::new();
///
/// // Delivered before anyone waits: latched, not lost.
/// shutdown.notify();
///
/// shutdown.wait().await;
/// # });
/// ```
pub struct Event {
    /// Latched notification; set by a notify that found nobody parked and
    /// consumed by the next wait.
    ///
    /// 锁存的通知；由未发现挂起者的 notify 置位，由下一次等待消费。
    notified: AtomicBool,

    /// The single parked waiter.
    ///
    /// 唯一挂起的等待者。
    waiter: Mutex<Option<Waker>>,
}

impl Event {
    /// Create a new event with nothing latched and nobody parked.
    ///
    /// 创建一个新事件，无锁存通知，也无挂起者。
    pub fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
            waiter: Mutex::new(None),
        }
    }

    /// Returns a future that completes when [`notify`](Self::notify) fires.
    ///
    /// If a notification was already latched, the future completes on its
    /// first poll and the latch is cleared.
    ///
    /// 返回一个在 [`notify`](Self::notify) 触发时完成的 future。
    ///
    /// 如果通知已被锁存，该 future 在第一次 poll 时完成并清除锁存。
    #[inline]
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            event: self,
            parked: false,
        }
    }

    /// Wake the parked waiter, or latch the notification if nobody waits yet.
    ///
    /// Notifying twice before the next wait is the same as notifying once:
    /// the waiter resumes exactly once and the latch is clean afterwards.
    ///
    /// 唤醒已挂起的等待者；若尚无等待者，则锁存该通知。
    ///
    /// 在下一次等待之前通知两次与通知一次效果相同：等待者恰好恢复一次，
    /// 之后锁存为空。
    pub fn notify(&self) {
        let waker = {
            let mut waiter = self.lock();
            // Latch before unparking, inside the lock: a waiter that checks
            // the latch while holding the lock cannot miss this notify, and
            // the woken task consumes the latch when it resumes.
            // 在持锁期间先锁存再解除挂起：持锁复查锁存的等待者不会错过
            // 这次通知，被唤醒的任务恢复时消费该锁存。
            self.notified.store(true, Ordering::Release);
            waiter.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Waker>> {
        self.waiter.lock().expect("event lock poisoned")
    }

    /// Consume the latch if it is set.
    ///
    /// 若锁存已置位则消费之。
    fn consume(&self) -> bool {
        self.notified.swap(false, Ordering::AcqRel)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("notified", &self.notified.load(Ordering::Acquire))
            .finish()
    }
}

/// Future returned by [`Event::wait`].
///
/// [`Event::wait`] 返回的 future。
#[derive(Debug)]
pub struct Wait<'a> {
    event: &'a Event,
    /// Whether this wait has left a waker in the event's slot.
    ///
    /// 本次等待是否已在事件槽位中留下 waker。
    parked: bool,
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Fast path: a latched notify is consumed without the lock.
        // 快速路径：消费已锁存的通知，无需取锁。
        if self.event.consume() {
            if self.parked {
                self.event.lock().take();
                self.parked = false;
            }
            return Poll::Ready(());
        }

        {
            let mut waiter = self.event.lock();
            // Re-check under the lock; notify latches while holding it, so
            // parking after this check cannot lose a wakeup.
            // 持锁复查；notify 在持锁期间锁存，因此在此检查之后挂起
            // 不会丢失唤醒。
            if self.event.consume() {
                waiter.take();
                drop(waiter);
                self.parked = false;
                return Poll::Ready(());
            }
            let stale = !waiter
                .as_ref()
                .is_some_and(|current| current.will_wake(cx.waker()));
            if stale {
                *waiter = Some(cx.waker().clone());
            }
        }

        self.parked = true;
        Poll::Pending
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        // A cancelled wait leaves no waker behind. If a notify raced this
        // drop it already took the waker and its latch stays set for the
        // next waiter.
        //
        // 被取消的等待不留下任何 waker。若有 notify 与此次 drop 竞争，
        // 它已取走 waker，且其锁存保留给下一个等待者。
        if self.parked {
            self.event.lock().take();
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, timeout, Duration};

    #[tokio::test]
    async fn test_latch_is_consumed_exactly_once() {
        let event = Event::new();

        event.notify();
        event.notify();

        // However many notifies preceded it, one wait consumes the latch ...
        timeout(Duration::from_secs(1), event.wait())
            .await
            .expect("latched notify completes the first wait");

        // ... and the next wait finds nothing to consume.
        assert!(
            timeout(Duration::from_millis(50), event.wait())
                .await
                .is_err(),
            "a consumed latch must not complete a second wait"
        );
    }

    #[tokio::test]
    async fn test_unparks_waiter_in_another_task() {
        let event = Arc::new(Event::new());

        let waiter = {
            let event = event.clone();
            tokio::spawn(async move {
                event.wait().await;
            })
        };

        sleep(Duration::from_millis(20)).await;
        event.notify();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("parked waiter must resume")
            .unwrap();
    }

    #[tokio::test]
    async fn test_timed_out_wait_leaves_event_usable() {
        let event = Arc::new(Event::new());

        // The select-loop pattern: a wait that loses its race is dropped.
        assert!(timeout(Duration::from_millis(20), event.wait())
            .await
            .is_err());

        // A fresh pair still works afterwards.
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move {
                event.wait().await;
            })
        };
        sleep(Duration::from_millis(20)).await;
        event.notify();

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("event must survive a cancelled wait")
            .unwrap();
    }

    #[tokio::test]
    async fn test_notify_after_cancelled_wait_stays_latched() {
        let event = Event::new();

        {
            let mut cancelled = event.wait();
            // Park it once, then abandon it.
            futures::future::poll_fn(|cx| {
                let _ = Pin::new(&mut cancelled).poll(cx);
                Poll::Ready(())
            })
            .await;
        }

        event.notify();

        timeout(Duration::from_secs(1), event.wait())
            .await
            .expect("latch must survive an abandoned wait");
    }

    #[tokio::test]
    async fn test_ping_pong_rendezvous() {
        let ping = Arc::new(Event::new());
        let pong = Arc::new(Event::new());

        let peer = {
            let (ping, pong) = (ping.clone(), pong.clone());
            tokio::spawn(async move {
                for _ in 0..50 {
                    ping.wait().await;
                    pong.notify();
                }
            })
        };

        for _ in 0..50 {
            ping.notify();
            pong.wait().await;
        }

        timeout(Duration::from_secs(5), peer)
            .await
            .expect("ping-pong must not lose a round")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ping_pong_across_threads() {
        let ping = Arc::new(Event::new());
        let pong = Arc::new(Event::new());

        let peer = {
            let (ping, pong) = (ping.clone(), pong.clone());
            tokio::spawn(async move {
                for _ in 0..200 {
                    ping.wait().await;
                    pong.notify();
                }
            })
        };

        for _ in 0..200 {
            ping.notify();
            pong.wait().await;
        }

        timeout(Duration::from_secs(5), peer)
            .await
            .expect("cross-thread rendezvous must not stall")
            .unwrap();
    }
}
