//! Inbound end: listening socket, accept loop, capacity-limited pool.
//!
//! 入站端：监听套接字、accept 循环、容量受限的连接池。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::pool::{spawn_connection, Connection, Pool};
use crate::protocol::{Protocol, Side};
use crate::socket::Socket;

const LISTEN_BACKLOG: u32 = 128;

/// Protocol-driven TCP server.
///
/// [`bind`](Self::bind) creates the listening socket, [`serve`](Self::serve)
/// starts the accept loop, and [`shutdown`](Self::shutdown) tears everything
/// down in order: stop accepting, close every live connection, wait for
/// their tasks to drain, reclaim them.
///
/// 协议驱动的 TCP 服务端。
///
/// [`bind`](Self::bind) 创建监听套接字，[`serve`](Self::serve) 启动
/// accept 循环，[`shutdown`](Self::shutdown) 按序拆除一切：停止接受、
/// 关闭每条活跃连接、等待其任务排空、回收它们。
pub struct Server<P: Protocol> {
    inner: Arc<ServerInner<P>>,
}

struct ServerInner<P: Protocol> {
    protocol: Arc<P>,
    config: Config,
    local_addr: SocketAddr,
    listener: std::sync::Mutex<Option<TcpListener>>,
    accept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    /// Single waiter: the accept loop.
    ///
    /// 单一等待者：accept 循环。
    accept_shutdown: Event,
    pool: Arc<Pool<P>>,
}

impl<P: Protocol> Server<P> {
    /// Bind a listening socket with reuse-address set and a backlog of 128.
    ///
    /// 绑定监听套接字，启用地址重用，backlog 为 128。
    pub fn bind(addr: SocketAddr, protocol: P, config: Config) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;

        tracing::debug!(%local_addr, "server bound");

        Ok(Self {
            inner: Arc::new(ServerInner {
                protocol: Arc::new(protocol),
                pool: Arc::new(Pool::new(config.max_connections)),
                config,
                local_addr,
                listener: std::sync::Mutex::new(Some(listener)),
                accept_task: std::sync::Mutex::new(None),
                accept_shutdown: Event::new(),
            }),
        })
    }

    /// Address the listener actually bound to (useful with port 0).
    ///
    /// 监听器实际绑定的地址（配合端口 0 时很有用）。
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Spawn the accept loop. Call once.
    ///
    /// # Errors
    /// [`Error::Cancelled`] if already serving or shut down.
    ///
    /// 派生 accept 循环。只调用一次。
    ///
    /// # 错误
    /// 已在服务或已关闭时返回 [`Error::Cancelled`]。
    pub fn serve(&self) -> Result<()> {
        let listener = self
            .inner
            .listener
            .lock()
            .expect("listener lock poisoned")
            .take()
            .ok_or(Error::Cancelled)?;

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.accept_loop(listener).await;
        });

        *self
            .inner
            .accept_task
            .lock()
            .expect("accept task lock poisoned") = Some(handle);
        Ok(())
    }

    /// Live connections currently in the pool.
    ///
    /// 当前池中的活跃连接数。
    pub async fn connection_count(&self) -> usize {
        self.inner.pool.lock().await.conns.len()
    }

    /// Tear the server down: stop accepting, close every connection, wait
    /// for in-flight tasks, run the final purge. Idempotent.
    ///
    /// 拆除服务端：停止接受、关闭每条连接、等待在途任务、执行最终
    /// purge。幂等。
    pub async fn shutdown(&self) {
        if self.inner.pool.begin_shutdown() {
            return;
        }
        tracing::debug!(local_addr = %self.inner.local_addr, "server shutting down");

        // Stop the accept loop and join it before touching the pool, so no
        // new connection can race the snapshot below.
        // 在触碰池之前先停止并 join accept 循环，使新连接无法与下面的
        // 快照竞争。
        self.inner.accept_shutdown.notify();
        let accept_task = self
            .inner
            .accept_task
            .lock()
            .expect("accept task lock poisoned")
            .take();
        if let Some(task) = accept_task {
            let _ = task.await;
        }

        self.inner.close_connections().await;
        self.inner.pool.tasks.wait().await;
        self.inner
            .pool
            .purge(&self.inner.protocol, Side::Server)
            .await;
    }
}

impl<P: Protocol> ServerInner<P> {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.accept_shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.accept_one(stream, peer).await;
                        // Opportunistic reclamation between accepts.
                        // 在两次 accept 之间机会性地回收。
                        self.pool.purge(&self.protocol, Side::Server).await;
                    }
                    Err(err) if is_terminal_accept_error(&err) => {
                        tracing::warn!(error = %err, "listener failed, stopping accept loop");
                        break;
                    }
                    Err(err) => {
                        // Transient (connection aborted mid-handshake, fd
                        // pressure): log and keep accepting.
                        // 瞬态错误（握手中途连接中止、fd 压力）：
                        // 记录并继续接受。
                        tracing::warn!(error = %err, "accept failed, retrying");
                        tokio::task::yield_now().await;
                    }
                },
            }
        }
        tracing::debug!(local_addr = %self.local_addr, "accept loop stopped");
    }

    async fn accept_one(&self, stream: TcpStream, peer: SocketAddr) {
        self.pool.tasks.add(1);

        let socket = Arc::new(Socket::new(
            Side::Server,
            peer,
            self.config.write_queue_size,
        ));
        let conn = Arc::new(Connection::new(socket));

        {
            let mut state = self.pool.lock().await;
            if self.pool.is_done() || state.conns.len() == self.config.max_connections {
                drop(state);
                // The accept is dropped, the listener keeps going.
                // 丢弃这次 accept，监听器继续运行。
                tracing::debug!(
                    %peer,
                    limit = self.config.max_connections,
                    error = %Error::ConnectionLimit,
                    "connection rejected"
                );
                self.pool.tasks.add(-1);
                return;
            }
            state.conns.push(Arc::clone(&conn));
        }

        tracing::debug!(%peer, "connection accepted");
        spawn_connection(
            Arc::clone(&self.pool),
            Arc::clone(&self.protocol),
            self.config.clone(),
            conn,
            stream,
            Side::Server,
            true,
        );
    }

    /// Snapshot-and-clear the pool, then close every snapshotted connection:
    /// protocol `close` first, then the shutdown notify that terminates its
    /// reader and writer.
    ///
    /// 快照并清空池，然后关闭每条快照中的连接：先调用协议的 `close`，
    /// 再发出终止其读者与写者的关闭通知。
    async fn close_connections(&self) {
        let snapshot = {
            let mut state = self.pool.lock().await;
            std::mem::take(&mut state.conns)
        };

        for conn in snapshot {
            self.protocol.close(Side::Server, &conn.socket).await;
            conn.socket.notify_shutdown();
        }
    }
}

fn is_terminal_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::InvalidInput | io::ErrorKind::BrokenPipe
    )
}

impl<P: Protocol> Clone for Server<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> std::fmt::Debug for Server<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.inner.local_addr)
            .field("pool", &self.inner.pool)
            .finish()
    }
}
