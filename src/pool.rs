//! Shared pool machinery for clients and servers.
//!
//! Both ends manage connections the same way: a bounded table of live
//! connections and a cleanup list of exited ones, guarded together by one
//! async mutex, plus a counter over in-flight connection tasks. A
//! connection moves through three states: *active* (in the table),
//! *draining* (removed, task winding down), *reclaimable* (on the cleanup
//! list). Its memory is freed strictly after its task has terminated:
//! the task itself holds the last clone of the connection until it returns.
//!
//! 客户端与服务端共享的池机制。
//!
//! 两端以相同方式管理连接：一个有界的活跃连接表和一个已退出连接的
//! 清理列表，由同一把异步互斥锁共同守护，外加一个在途连接任务计数器。
//! 连接依次经历三个状态：*活跃*（在表中）、*排空中*（已移出，任务收尾）、
//! *可回收*（在清理列表上）。其内存严格在任务终止之后才被释放：
//! 任务自身持有连接的最后一个克隆，直到返回为止。

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::counter::Counter;
use crate::mutex::{Mutex, MutexGuard};
use crate::protocol::{Protocol, Side};
use crate::shim::atomic::{AtomicBool, Ordering};
use crate::socket::Socket;

/// One pooled connection: the shared socket handle plus the join handle of
/// the task running its read/write loop.
///
/// 一条入池连接：共享的套接字句柄，加上运行其读写循环的任务的 join 句柄。
pub(crate) struct Connection<P: Protocol> {
    pub(crate) socket: Arc<Socket<P>>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<P: Protocol> Connection<P> {
    pub(crate) fn new(socket: Arc<Socket<P>>) -> Self {
        Self {
            socket,
            task: std::sync::Mutex::new(None),
        }
    }

    fn set_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().expect("connection task lock poisoned") = Some(handle);
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().expect("connection task lock poisoned").take()
    }
}

impl<P: Protocol> std::fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("socket", &self.socket)
            .finish()
    }
}

/// Mutex-guarded pool interior: live table plus cleanup list.
///
/// 互斥锁守护的池内部：活跃表加清理列表。
pub(crate) struct PoolState<P: Protocol> {
    /// Live connections, in insertion order (the client's tie-break relies
    /// on this order being stable).
    ///
    /// 活跃连接，按插入顺序（客户端的并列裁决依赖该顺序稳定）。
    pub(crate) conns: Vec<Arc<Connection<P>>>,

    /// Exited connections awaiting reclamation by `purge`.
    ///
    /// 等待 `purge` 回收的已退出连接。
    pub(crate) cleanup: Vec<Arc<Connection<P>>>,
}

/// Bounded connection pool shared by [`Client`](crate::client::Client) and
/// [`Server`](crate::server::Server).
///
/// [`Client`](crate::client::Client) 与 [`Server`](crate::server::Server)
/// 共享的有界连接池。
pub(crate) struct Pool<P: Protocol> {
    state: Mutex<PoolState<P>>,
    /// Barrier over in-flight connection tasks: +1 before each spawn, -1 on
    /// each exit; shutdown waits for it to drain before the final purge.
    ///
    /// 在途连接任务的屏障：每次派生前 +1，每次退出时 -1；
    /// 关闭流程在最终 purge 之前等待其排空。
    pub(crate) tasks: Counter,
    done: AtomicBool,
}

impl<P: Protocol> Pool<P> {
    pub(crate) fn new(max_connections: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                conns: Vec::with_capacity(max_connections),
                cleanup: Vec::new(),
            }),
            tasks: Counter::new(),
            done: AtomicBool::new(false),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, PoolState<P>> {
        self.state.lock().await
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Mark the pool as shutting down. Returns whether it already was.
    ///
    /// 将池标记为正在关闭。返回先前是否已处于关闭状态。
    pub(crate) fn begin_shutdown(&self) -> bool {
        self.done.swap(true, Ordering::AcqRel)
    }

    /// Remove a connection from the live table if still present.
    ///
    /// 若连接仍在活跃表中则将其移出。
    pub(crate) async fn remove(&self, conn: &Arc<Connection<P>>) -> bool {
        let mut state = self.state.lock().await;
        match state.conns.iter().position(|c| Arc::ptr_eq(c, conn)) {
            Some(pos) => {
                // Keep insertion order intact for the client's tie-break.
                // 保持插入顺序不变，供客户端并列裁决使用。
                state.conns.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) async fn push_cleanup(&self, conn: Arc<Connection<P>>) {
        let mut state = self.state.lock().await;
        state.cleanup.push(conn);
    }

    /// Reclaim every connection on the cleanup list: join its task (a
    /// zero-wait join; the task already signalled exit), surface queue
    /// leftovers to the protocol's `purge`, then drop it.
    ///
    /// 回收清理列表上的每条连接：join 其任务（零等待的 join，
    /// 任务已发出退出信号），把队列剩余消息交给协议的 `purge`，
    /// 然后丢弃它。
    pub(crate) async fn purge(&self, protocol: &Arc<P>, side: Side) {
        let mut state = self.state.lock().await;
        self.purge_state(&mut state, protocol, side).await;
    }

    /// `purge` body for callers already holding the pool lock.
    ///
    /// 供已持有池锁的调用者使用的 `purge` 主体。
    pub(crate) async fn purge_state(
        &self,
        state: &mut PoolState<P>,
        protocol: &Arc<P>,
        side: Side,
    ) {
        if state.cleanup.is_empty() {
            return;
        }
        let reclaimable = std::mem::take(&mut state.cleanup);
        let count = reclaimable.len();

        for conn in reclaimable {
            // Membership in the cleanup list means the task is past every
            // pool-locking step, so joining under the lock cannot deadlock.
            // 进入清理列表意味着任务已越过所有会取池锁的步骤，
            // 因此持锁 join 不会死锁。
            if let Some(handle) = conn.take_task() {
                let _ = handle.await;
            }

            let mut leftover = Vec::new();
            conn.socket.queue().drain_pending(&mut leftover);
            protocol.purge(side, &conn.socket, leftover).await;
        }

        tracing::trace!(side = %side, reclaimed = count, "pool purge");
    }
}

impl<P: Protocol> std::fmt::Debug for Pool<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("tasks", &self.tasks)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Spawn the per-connection task.
///
/// The task yields first so the spawner's bookkeeping (pool insertion, task
/// handle registration) is observable before any protocol code can make
/// reentrant pool calls. The caller has already bumped `pool.tasks`.
///
/// 派生每连接任务。
///
/// 任务先让出一次，使派生方的登记（插入池、记录任务句柄）在任何协议
/// 代码可能重入调用池之前即可被观察到。调用方已递增 `pool.tasks`。
pub(crate) fn spawn_connection<P: Protocol>(
    pool: Arc<Pool<P>>,
    protocol: Arc<P>,
    config: Config,
    conn: Arc<Connection<P>>,
    stream: TcpStream,
    side: Side,
    handshake_in_task: bool,
) {
    let task_conn = Arc::clone(&conn);

    let handle = tokio::spawn(async move {
        tokio::task::yield_now().await;

        let socket = Arc::clone(&task_conn.socket);
        let result: crate::error::Result<()> = async {
            if handshake_in_task {
                let context = protocol.handshake(side, &socket).await?;
                socket.set_context(context);
            }
            socket.run(stream, &protocol, &config).await
        }
        .await;

        match &result {
            Ok(()) => {
                tracing::debug!(side = %side, peer = %socket.peer_addr(), "connection finished")
            }
            Err(err) if err.is_cancelled() => {
                tracing::debug!(side = %side, peer = %socket.peer_addr(), "connection cancelled")
            }
            Err(err) => {
                tracing::debug!(side = %side, peer = %socket.peer_addr(), error = %err, "connection failed")
            }
        }

        // Self-removal: only the path that actually deleted the connection
        // runs the protocol's close hook, so it fires exactly once even when
        // pool close() races this exit.
        // 自我移除：只有真正删除了连接的路径才运行协议的 close 钩子，
        // 因此即使池的 close() 与此处退出竞争，它也恰好触发一次。
        let removed = pool.remove(&task_conn).await;
        if removed {
            protocol.close(side, &socket).await;
        }

        pool.push_cleanup(task_conn).await;
        pool.tasks.add(-1);
    });

    conn.set_task(handle);
}
