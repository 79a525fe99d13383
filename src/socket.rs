//! Per-connection runtime: the shared socket handle plus its two cooperating
//! tasks.
//!
//! Each live connection is exactly two tasks sharing nothing but the write
//! queue: the *reader* (the connection task itself, driving
//! `Protocol::read` over the framing reader) and the *writer* (spawned by
//! [`Socket::run`], draining the queue a whole batch at a time into
//! `Protocol::write`). When the reader returns, the queue is closed and the
//! writer is awaited; the writer therefore terminates exactly once per
//! connection, and its terminal error is discarded.
//!
//! 每连接运行时：共享的套接字句柄及其两个协作任务。
//!
//! 每条活跃连接恰好是两个只共享写队列的任务：*读者*（连接任务本身，
//! 在帧读取器上驱动 `Protocol::read`）和*写者*（由 [`Socket::run`]
//! 派生，每次整批地将队列排空进 `Protocol::write`）。读者返回时队列
//! 被关闭、写者被等待；因此写者每条连接恰好终止一次，其终态错误
//! 被丢弃。

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

use tokio::net::TcpStream;

use crate::buffer::{Reader, Writer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::protocol::{Protocol, Side};
use crate::queue::Queue;

/// Shared per-connection handle: write queue, peer address, user context.
///
/// Handed to every protocol callback; user code enqueues outbound messages
/// through [`write`](Self::write) and reads its handshake state through
/// [`context`](Self::context).
///
/// 共享的每连接句柄：写队列、对端地址、用户上下文。
///
/// 传给每个协议回调；用户代码通过 [`write`](Self::write) 入队出站消息，
/// 通过 [`context`](Self::context) 读取其握手状态。
pub struct Socket<P: Protocol> {
    side: Side,
    peer_addr: SocketAddr,
    queue: Queue<P::Message>,
    context: OnceLock<P::Context>,
    /// Raced against the reader loop; notified by pool teardown or a failed
    /// writer task.
    ///
    /// 与读循环竞争；由池的拆除或失败的写者任务通知。
    shutdown: Event,
}

impl<P: Protocol> Socket<P> {
    pub(crate) fn new(side: Side, peer_addr: SocketAddr, write_queue_size: NonZeroUsize) -> Self {
        Self {
            side,
            peer_addr,
            queue: Queue::new(write_queue_size),
            context: OnceLock::new(),
            shutdown: Event::new(),
        }
    }

    /// Enqueue a message for the writer task.
    ///
    /// Blocks while the write queue is full, which is the framework's
    /// backpressure toward producers.
    ///
    /// # Errors
    /// [`Error::Cancelled`] once the connection is being torn down; the
    /// message was not enqueued.
    ///
    /// 为写者任务入队一条消息。
    ///
    /// 写队列满时阻塞；这就是框架对生产者的背压。
    ///
    /// # 错误
    /// 连接正在拆除时返回 [`Error::Cancelled`]；该消息未被入队。
    pub async fn write(&self, message: P::Message) -> Result<()> {
        self.queue.push(message).await.map_err(|_| Error::Cancelled)
    }

    /// Messages currently buffered in the write queue.
    ///
    /// The client's least-loaded dispatch reads this.
    ///
    /// 写队列中当前缓冲的消息数。
    ///
    /// 客户端的最小负载分发会读取它。
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    /// Which end of the connection this is.
    ///
    /// 这是连接的哪一端。
    #[inline]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Remote address.
    ///
    /// 对端地址。
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Context returned by the protocol's `handshake`, if it has run.
    ///
    /// 协议 `handshake` 返回的上下文（若已运行）。
    #[inline]
    pub fn context(&self) -> Option<&P::Context> {
        self.context.get()
    }

    pub(crate) fn set_context(&self, context: P::Context) {
        // A second handshake per connection cannot happen; a lost race here
        // would mean the lifecycle invariant is broken upstream.
        let _ = self.context.set(context);
    }

    pub(crate) fn notify_shutdown(&self) {
        self.shutdown.notify();
    }

    pub(crate) fn queue(&self) -> &Queue<P::Message> {
        &self.queue
    }

    /// Drive the connection: spawn the writer task, run the protocol's read
    /// loop raced against the shutdown event, then close the queue and await
    /// the writer.
    ///
    /// 驱动连接：派生写者任务，在与关闭事件的竞争中运行协议的读循环，
    /// 然后关闭队列并等待写者。
    pub(crate) async fn run(
        self: &Arc<Self>,
        stream: TcpStream,
        protocol: &Arc<P>,
        config: &Config,
    ) -> Result<()> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = Reader::new(read_half, config.read_buffer_size);
        let mut writer = Writer::new(write_half, config.write_buffer_size);

        let writer_task = tokio::spawn({
            let socket = Arc::clone(self);
            let protocol = Arc::clone(protocol);
            async move {
                // Reserved once; pop never yields more than capacity.
                // 只保留一次；pop 产出的数量永远不会超过容量。
                let mut batch: Vec<P::Message> = Vec::with_capacity(socket.queue.capacity());
                loop {
                    batch.clear();
                    if socket.queue.pop(&mut batch).await.is_err() {
                        break;
                    }
                    if let Err(err) = protocol
                        .write(socket.side, &socket, &mut writer, &mut batch)
                        .await
                    {
                        if !err.is_cancelled() {
                            tracing::debug!(
                                side = %socket.side,
                                peer = %socket.peer_addr,
                                error = %err,
                                "writer task failed"
                            );
                        }
                        // Unblock the reader loop as well; a connection with
                        // a dead writer cannot make progress.
                        // 同时解除读循环的阻塞；写者已死的连接无法再推进。
                        socket.shutdown.notify();
                        break;
                    }
                }
            }
        });

        let result = tokio::select! {
            res = protocol.read(self.side, self, &mut reader) => res,
            _ = self.shutdown.wait() => Err(Error::Cancelled),
        };

        // Terminate the writer exactly once, discarding its terminal error.
        // On a forced teardown the writer may be parked inside a callback
        // that will never complete (its batch is the in-flight loss the
        // purge contract allows), so it is cancelled rather than awaited.
        //
        // 恰好终止写者一次，丢弃其终态错误。强制拆除时写者可能挂在一个
        // 永远不会完成的回调里（其批次就是 purge 契约允许的在途损失），
        // 因此取消它而不是等待它。
        self.queue.close();
        match &result {
            Err(err) if err.is_cancelled() => {
                writer_task.abort();
                let _ = writer_task.await;
            }
            _ => {
                let mut writer_task = writer_task;
                tokio::select! {
                    _ = &mut writer_task => {}
                    _ = self.shutdown.wait() => {
                        writer_task.abort();
                        let _ = writer_task.await;
                    }
                }
            }
        }

        result
    }
}

impl<P: Protocol> std::fmt::Debug for Socket<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("side", &self.side)
            .field("peer_addr", &self.peer_addr)
            .field("pending", &self.queue.pending())
            .finish()
    }
}
