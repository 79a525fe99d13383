//! Bounded message queue with blocking push, drain-all pop, and terminal close.
//!
//! Every connection owns one as its write queue: any number of user tasks push
//! messages (blocking while the ring is full, which is the framework's
//! backpressure), and the connection's single writer task pops. A pop never
//! takes one item; it drains *everything* currently queued so the protocol's
//! `write` callback encodes a whole batch per wake-up.
//!
//! The ring is a fixed slot array addressed by monotonically increasing
//! `head` / `tail` indices (wrap-aware subtraction), so `0 <= tail - head <=
//! capacity` holds at every observation point. Waiter bookkeeping lives under
//! a short internal lock that is never held across an await; wake-ups are
//! dispatched after the lock is released.
//!
//! `close` is terminal and idempotent: every parked pusher and popper wakes
//! exactly once with a closed error, and later calls fail without blocking.
//! Items still in the ring at close time are not lost; the pool's purge step
//! collects them with [`Queue::drain_pending`] and hands them to the
//! protocol's `purge` callback.
//!
//! 有界消息队列，带阻塞式 push、全量排空式 pop 和终态关闭。
//!
//! 每个连接拥有一个作为其写队列：任意数量的用户任务推入消息（环满时
//! 阻塞，这就是框架的背压），连接唯一的写出任务负责弹出。pop 从不
//! 只取一项；它排空当前排队的*全部*消息，使协议的 `write` 回调每次
//! 唤醒编码一整批。
//!
//! 环是一个固定槽位数组，由单调递增的 `head` / `tail` 索引寻址
//! （回绕感知的减法），因此在每个观察点都满足
//! `0 <= tail - head <= capacity`。等待者登记保存在一个短暂的内部锁
//! 下，该锁从不跨越 await 持有；唤醒在释放锁之后派发。
//!
//! `close` 是终态且幂等的：每个挂起的推入者和弹出者都恰好被唤醒一次
//! 并得到关闭错误，之后的调用不再阻塞、直接失败。关闭时仍在环中的
//! 消息不会丢失；池的 purge 步骤用 [`Queue::drain_pending`] 收集它们
//! 并交给协议的 `purge` 回调。

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::task::{Context, Poll, Waker};

use crate::shim::sync::Mutex;

/// Error returned by [`Queue::push`] after the queue has been closed.
///
/// Carries the rejected message back to the caller.
///
/// [`Queue::push`] 在队列关闭后返回的错误。
///
/// 将被拒绝的消息带回给调用者。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue is closed.
    ///
    /// 队列已关闭。
    Closed(T),
}

/// Error returned by [`Queue::try_push`].
///
/// [`Queue::try_push`] 返回的错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPushError<T> {
    /// Ring is full.
    ///
    /// 环已满。
    Full(T),

    /// Queue is closed.
    ///
    /// 队列已关闭。
    Closed(T),
}

/// Error returned by [`Queue::pop`] once the queue is closed and empty.
///
/// 队列关闭且已空后 [`Queue::pop`] 返回的错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopError {
    /// Queue is closed and holds no more items.
    ///
    /// 队列已关闭且不再持有任何消息。
    Closed,
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Closed(_) => write!(f, "queue closed"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

impl std::fmt::Display for PopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue closed")
    }
}

impl std::error::Error for PopError {}

struct Shared<T> {
    /// Fixed ring storage; a slot is `Some` exactly when its index lies in
    /// `[head, tail)`.
    ///
    /// 固定的环存储；当且仅当索引落在 `[head, tail)` 内时槽位为 `Some`。
    slots: Box<[Option<T>]>,

    /// Monotonic consume index.
    ///
    /// 单调递增的消费索引。
    head: usize,

    /// Monotonic publish index.
    ///
    /// 单调递增的发布索引。
    tail: usize,

    /// Terminal flag; set once by `close` and never cleared.
    ///
    /// 终态标志；由 `close` 置位一次，永不清除。
    dead: bool,

    /// The single parked popper (the connection's writer task).
    ///
    /// 唯一挂起的弹出者（连接的写出任务）。
    reader: Option<Waker>,

    /// FIFO of parked pushers.
    ///
    /// 挂起推入者的 FIFO。
    writers: VecDeque<Waker>,
}

/// Bounded ring queue with blocking push/pop and graceful shutdown.
///
/// 带阻塞式 push/pop 和优雅关闭的有界环形队列。
///
/// # Examples
///
/// ```
/// use lite_net::queue::Queue;
/// use std::num::NonZeroUsize;
///
/// # tokio_test::block_on(async {
/// let queue = Queue::new(NonZeroUsize::new(8).unwrap());
///
/// queue.push(1u32).await.unwrap();
/// queue.push(2u32).await.unwrap();
///
/// let mut batch = Vec::with_capacity(queue.capacity());
/// let drained = queue.pop(&mut batch).await.unwrap();
/// assert_eq!(drained, 2);
/// assert_eq!(batch, vec![1, 2]);
/// # });
/// ```
pub struct Queue<T> {
    shared: Mutex<Shared<T>>,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Create a queue with the given capacity.
    ///
    /// 创建具有给定容量的队列。
    pub fn new(capacity: NonZeroUsize) -> Self {
        let capacity = capacity.get();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            shared: Mutex::new(Shared {
                slots: slots.into_boxed_slice(),
                head: 0,
                tail: 0,
                dead: false,
                reader: None,
                writers: VecDeque::new(),
            }),
            capacity,
        }
    }

    fn lock(&self) -> crate::shim::sync::MutexGuard<'_, Shared<T>> {
        // The lock is only ever held for a few loads and stores; poisoning
        // would require a panic inside one of them.
        self.shared.lock().expect("queue lock poisoned")
    }

    /// Push a message, waiting while the ring is full.
    ///
    /// Parked pushers are woken in FIFO order once the popper drains the
    /// ring. A cancelled push (dropped future) never partially enqueues.
    ///
    /// # Errors
    /// [`PushError::Closed`] after [`close`](Self::close), carrying the
    /// message back.
    ///
    /// 推入一条消息，环满时等待。
    ///
    /// 弹出者排空环后，挂起的推入者按 FIFO 顺序被唤醒。被取消的 push
    /// （future 被丢弃）绝不会部分入队。
    ///
    /// # 错误
    /// 在 [`close`](Self::close) 之后返回 [`PushError::Closed`]，
    /// 并将消息带回。
    pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut item = Some(item);
        std::future::poll_fn(|cx| self.poll_push(cx, &mut item)).await
    }

    fn poll_push(
        &self,
        cx: &mut Context<'_>,
        item: &mut Option<T>,
    ) -> Poll<Result<(), PushError<T>>> {
        let mut wake_reader = None;

        let result = {
            let mut shared = self.lock();

            if shared.dead {
                let value = item.take().expect("push polled after completion");
                Poll::Ready(Err(PushError::Closed(value)))
            } else if shared.tail.wrapping_sub(shared.head) < self.capacity {
                let value = item.take().expect("push polled after completion");
                let idx = shared.tail % self.capacity;
                shared.slots[idx] = Some(value);
                shared.tail = shared.tail.wrapping_add(1);
                wake_reader = shared.reader.take();
                Poll::Ready(Ok(()))
            } else {
                shared.writers.push_back(cx.waker().clone());
                Poll::Pending
            }
        };

        // Dispatch outside the lock.
        // 在锁外派发唤醒。
        if let Some(waker) = wake_reader {
            waker.wake();
        }
        result
    }

    /// Push without waiting.
    ///
    /// # Errors
    /// [`TryPushError::Full`] while the ring is full, [`TryPushError::Closed`]
    /// after close; both carry the message back.
    ///
    /// 非阻塞地推入。
    ///
    /// # 错误
    /// 环满时返回 [`TryPushError::Full`]，关闭后返回
    /// [`TryPushError::Closed`]；两者都将消息带回。
    pub fn try_push(&self, item: T) -> Result<(), TryPushError<T>> {
        let mut wake_reader = None;

        let result = {
            let mut shared = self.lock();

            if shared.dead {
                Err(TryPushError::Closed(item))
            } else if shared.tail.wrapping_sub(shared.head) < self.capacity {
                let idx = shared.tail % self.capacity;
                shared.slots[idx] = Some(item);
                shared.tail = shared.tail.wrapping_add(1);
                wake_reader = shared.reader.take();
                Ok(())
            } else {
                Err(TryPushError::Full(item))
            }
        };

        if let Some(waker) = wake_reader {
            waker.wake();
        }
        result
    }

    /// Drain **all** currently queued items into `dst`, waiting while empty.
    ///
    /// Returns the number of items appended. `dst` should be reserved to
    /// [`capacity`](Self::capacity) up front so the hot path never
    /// reallocates.
    ///
    /// Only one task may pop at a time (the connection's writer task); the
    /// parked-popper slot holds a single waker.
    ///
    /// # Errors
    /// [`PopError::Closed`] once the queue is closed; any items still queued
    /// at that point are left for [`drain_pending`](Self::drain_pending).
    ///
    /// 将当前排队的**全部**消息排空到 `dst`，为空时等待。
    ///
    /// 返回追加的消息数量。`dst` 应预先保留 [`capacity`](Self::capacity)
    /// 的空间，使热路径永不重新分配。
    ///
    /// 任意时刻只能有一个任务 pop（连接的写出任务）；挂起弹出者槽位
    /// 只保存单个 waker。
    ///
    /// # 错误
    /// 队列关闭后返回 [`PopError::Closed`]；此时仍在队列中的消息留给
    /// [`drain_pending`](Self::drain_pending)。
    pub async fn pop(&self, dst: &mut Vec<T>) -> Result<usize, PopError> {
        std::future::poll_fn(|cx| self.poll_pop(cx, dst)).await
    }

    fn poll_pop(&self, cx: &mut Context<'_>, dst: &mut Vec<T>) -> Poll<Result<usize, PopError>> {
        let mut wake_writers = VecDeque::new();

        let result = {
            let mut shared = self.lock();

            let queued = shared.tail.wrapping_sub(shared.head);
            debug_assert!(queued <= self.capacity);

            if shared.dead {
                // The ring is abandoned on close; leftovers are surfaced by
                // `drain_pending` on the purge path, not by ordinary pops.
                // 关闭后环即被放弃；剩余消息由 purge 路径上的
                // `drain_pending` 取出，而不是普通的 pop。
                Poll::Ready(Err(PopError::Closed))
            } else if queued > 0 {
                for _ in 0..queued {
                    let idx = shared.head % self.capacity;
                    let value = shared.slots[idx].take().expect("empty slot inside [head, tail)");
                    dst.push(value);
                    shared.head = shared.head.wrapping_add(1);
                }
                // The whole ring is free again; release every parked pusher.
                // 整个环重新空闲；释放所有挂起的推入者。
                wake_writers = std::mem::take(&mut shared.writers);
                Poll::Ready(Ok(queued))
            } else {
                shared.reader = Some(cx.waker().clone());
                Poll::Pending
            }
        };

        for waker in wake_writers {
            waker.wake();
        }
        result
    }

    /// Non-blocking drain that also works after [`close`](Self::close).
    ///
    /// This is the purge path: it surfaces messages that were enqueued but
    /// never handed to the writer task.
    ///
    /// 非阻塞排空，在 [`close`](Self::close) 之后同样可用。
    ///
    /// 这是 purge 路径：它取出已入队但从未交给写出任务的消息。
    pub fn drain_pending(&self, dst: &mut Vec<T>) -> usize {
        let mut wake_writers = VecDeque::new();

        let drained = {
            let mut shared = self.lock();

            let queued = shared.tail.wrapping_sub(shared.head);
            for _ in 0..queued {
                let idx = shared.head % self.capacity;
                let value = shared.slots[idx].take().expect("empty slot inside [head, tail)");
                dst.push(value);
                shared.head = shared.head.wrapping_add(1);
            }
            if queued > 0 && !shared.dead {
                wake_writers = std::mem::take(&mut shared.writers);
            }
            queued
        };

        for waker in wake_writers {
            waker.wake();
        }
        drained
    }

    /// Close the queue. Idempotent.
    ///
    /// Every parked pusher and popper wakes exactly once with a closed error;
    /// later pushes and pops fail immediately. Items still in the ring stay
    /// there for [`drain_pending`](Self::drain_pending).
    ///
    /// 关闭队列。幂等。
    ///
    /// 每个挂起的推入者和弹出者都恰好被唤醒一次并得到关闭错误；之后的
    /// push 和 pop 立即失败。仍在环中的消息保留给
    /// [`drain_pending`](Self::drain_pending)。
    pub fn close(&self) {
        let (reader, writers) = {
            let mut shared = self.lock();
            if shared.dead {
                return;
            }
            shared.dead = true;
            (shared.reader.take(), std::mem::take(&mut shared.writers))
        };

        if let Some(waker) = reader {
            waker.wake();
        }
        for waker in writers {
            waker.wake();
        }
    }

    /// Number of items currently queued.
    ///
    /// 当前排队的消息数量。
    pub fn pending(&self) -> usize {
        let shared = self.lock();
        shared.tail.wrapping_sub(shared.head)
    }

    /// Ring capacity.
    ///
    /// 环容量。
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether [`close`](Self::close) has been called.
    ///
    /// 是否已调用 [`close`](Self::close)。
    pub fn is_closed(&self) -> bool {
        self.lock().dead
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("pending", &self.pending())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}
