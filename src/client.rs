//! Outbound end: lazily connected pool with least-loaded dispatch.
//!
//! 出站端：惰性建连的连接池，按最小负载分发。

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::{spawn_connection, Connection, Pool, PoolState};
use crate::protocol::{Protocol, Side};
use crate::socket::Socket;

/// Protocol-driven TCP client.
///
/// Connections are opened on demand and multiplexed: a write goes to the
/// first idle connection, or the least-loaded one once the pool is at
/// capacity. No connection exists until the first
/// [`write`](Self::write) / [`socket`](Self::socket) call.
///
/// 协议驱动的 TCP 客户端。
///
/// 连接按需建立并被复用：写入投递到第一条空闲连接，池满后投递到负载
/// 最小的连接。在第一次 [`write`](Self::write) /
/// [`socket`](Self::socket) 调用之前不存在任何连接。
pub struct Client<P: Protocol> {
    inner: Arc<ClientInner<P>>,
}

struct ClientInner<P: Protocol> {
    protocol: Arc<P>,
    config: Config,
    remote_addr: SocketAddr,
    pool: Arc<Pool<P>>,
}

impl<P: Protocol> Client<P> {
    /// Create a client for `remote_addr`. Does not connect yet.
    ///
    /// 为 `remote_addr` 创建客户端。此时尚不建立连接。
    pub fn new(remote_addr: SocketAddr, protocol: P, config: Config) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                protocol: Arc::new(protocol),
                pool: Arc::new(Pool::new(config.max_connections)),
                config,
                remote_addr,
            }),
        }
    }

    /// Enqueue `message` on the connection picked by the dispatch policy.
    ///
    /// May suspend twice: waiting for the pool lock / a lazy connect, and
    /// then on the picked connection's write queue when it is full.
    ///
    /// # Errors
    /// [`Error::Cancelled`] during shutdown, [`Error::Io`] when a lazy
    /// connect fails, any handshake error from the protocol.
    ///
    /// 将 `message` 入队到分发策略选中的连接。
    ///
    /// 可能挂起两次：等待池锁 / 惰性建连，以及所选连接写队列已满时。
    ///
    /// # 错误
    /// 关闭期间返回 [`Error::Cancelled`]，惰性建连失败返回
    /// [`Error::Io`]，以及协议握手产生的任何错误。
    pub async fn write(&self, message: P::Message) -> Result<()> {
        let socket = self.socket().await?;
        socket.write(message).await
    }

    /// Pick (or lazily open) a connection by the least-loaded policy and
    /// return its socket handle.
    ///
    /// Policy, evaluated under the pool mutex:
    /// 1. an empty pool connects;
    /// 2. any connection with `pending() == 0` is taken immediately;
    /// 3. otherwise the smallest `pending()` is remembered (ties go to the
    ///    earliest connection in pool order);
    /// 4. below the pool bound, a fresh connection is opened;
    /// 5. at the bound, the least-loaded survivor wins.
    ///
    /// 按最小负载策略选取（或惰性打开）一条连接并返回其套接字句柄。
    ///
    /// 策略在池互斥锁下求值：
    /// 1. 池为空时建连；
    /// 2. 任一连接 `pending() == 0` 时直接用它；
    /// 3. 否则记住最小的 `pending()`（并列时取池序最早者）；
    /// 4. 低于池上限时新建一条；
    /// 5. 达到上限时用负载最小的幸存者。
    pub async fn socket(&self) -> Result<Arc<Socket<P>>> {
        let inner = &self.inner;
        let mut state = inner.pool.lock().await;

        if inner.pool.is_done() {
            return Err(Error::Cancelled);
        }

        if state.conns.is_empty() {
            return inner.connect_locked(&mut state).await;
        }

        let mut best = 0;
        let mut best_pending = usize::MAX;
        for (index, conn) in state.conns.iter().enumerate() {
            let pending = conn.socket.pending();
            if pending == 0 {
                return Ok(Arc::clone(&conn.socket));
            }
            if pending < best_pending {
                best_pending = pending;
                best = index;
            }
        }

        if state.conns.len() < inner.config.max_connections {
            // About to spend a slot; reclaim exited connections first so the
            // cleanup list cannot grow unbounded on a long-lived client.
            // 即将占用一个槽位；先回收已退出的连接，使清理列表不会在
            // 长寿命客户端上无界增长。
            inner
                .pool
                .purge_state(&mut state, &inner.protocol, Side::Client)
                .await;
            return inner.connect_locked(&mut state).await;
        }

        Ok(Arc::clone(&state.conns[best].socket))
    }

    /// Live connections currently in the pool.
    ///
    /// 当前池中的活跃连接数。
    pub async fn connection_count(&self) -> usize {
        self.inner.pool.lock().await.conns.len()
    }

    /// Tear the client down: close every connection, wait for their tasks,
    /// run the final purge. Idempotent.
    ///
    /// 拆除客户端：关闭每条连接、等待其任务、执行最终 purge。幂等。
    pub async fn shutdown(&self) {
        if self.inner.pool.begin_shutdown() {
            return;
        }
        tracing::debug!(remote_addr = %self.inner.remote_addr, "client shutting down");

        let snapshot = {
            let mut state = self.inner.pool.lock().await;
            std::mem::take(&mut state.conns)
        };
        for conn in snapshot {
            // Close-before-teardown, mirroring the server.
            // 先 close 再拆除，与服务端一致。
            self.inner.protocol.close(Side::Client, &conn.socket).await;
            conn.socket.notify_shutdown();
        }

        self.inner.pool.tasks.wait().await;
        self.inner
            .pool
            .purge(&self.inner.protocol, Side::Client)
            .await;
    }
}

impl<P: Protocol> ClientInner<P> {
    /// The dial, inline handshake, registration, and spawn all happen under
    /// the pool mutex, so a returned socket is always a fully established
    /// connection.
    ///
    /// 拨号、内联握手、登记、派生任务全部在池互斥锁下进行，
    /// 因此返回的套接字总是一条完全建立的连接。
    async fn connect_locked(&self, state: &mut PoolState<P>) -> Result<Arc<Socket<P>>> {
        self.pool.tasks.add(1);

        let stream = match TcpStream::connect(self.remote_addr).await {
            Ok(stream) => stream,
            Err(err) => {
                self.pool.tasks.add(-1);
                return Err(err.into());
            }
        };

        let socket = Arc::new(Socket::new(
            Side::Client,
            self.remote_addr,
            self.config.write_queue_size,
        ));

        match self.protocol.handshake(Side::Client, &socket).await {
            Ok(context) => socket.set_context(context),
            Err(err) => {
                // Torn down before it was ever established; dropping the
                // stream closes the socket.
                // 在连接被视为建立之前即拆除；丢弃流即关闭套接字。
                self.pool.tasks.add(-1);
                return Err(err);
            }
        }

        let conn = Arc::new(Connection::new(Arc::clone(&socket)));
        state.conns.push(Arc::clone(&conn));

        tracing::debug!(
            remote_addr = %self.remote_addr,
            pool_len = state.conns.len(),
            "connection opened"
        );
        spawn_connection(
            Arc::clone(&self.pool),
            Arc::clone(&self.protocol),
            self.config.clone(),
            conn,
            stream,
            Side::Client,
            false,
        );

        Ok(socket)
    }
}

impl<P: Protocol> Clone for Client<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> std::fmt::Debug for Client<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("remote_addr", &self.inner.remote_addr)
            .field("pool", &self.inner.pool)
            .finish()
    }
}
