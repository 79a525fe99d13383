//! User protocol surface: the callback bundle that turns the framework into
//! an actual client or server.
//!
//! A [`Protocol`] defines framing and per-connection behavior. `read` and
//! `write` are mandatory (they drive the inbound loop and encode outbound
//! batches), while `handshake`, `close`, and `purge` default to no-ops. One
//! protocol instance is shared across every connection of a client or
//! server, so implementations are either stateless or synchronize their own
//! state.
//!
//! 用户协议表面：把框架变成真正客户端或服务端的回调集合。
//!
//! [`Protocol`] 定义帧格式和每连接行为。`read` 与 `write` 是必需的
//! （它们驱动入站循环并编码出站批次），而 `handshake`、`close`、`purge`
//! 默认是空操作。一个协议实例被客户端或服务端的所有连接共享，因此
//! 实现要么是无状态的，要么自行同步其状态。

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::buffer::{Reader, Writer};
use crate::error::Result;
use crate::socket::Socket;

/// The framing reader handed to [`Protocol::read`].
///
/// 交给 [`Protocol::read`] 的帧读取器。
pub type SocketReader = Reader<OwnedReadHalf>;

/// The framing writer handed to [`Protocol::write`].
///
/// 交给 [`Protocol::write`] 的帧写入器。
pub type SocketWriter = Writer<OwnedWriteHalf>;

/// Which end of the connection a callback runs on.
///
/// 回调运行在连接的哪一端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Outbound end, owned by a [`Client`](crate::client::Client).
    ///
    /// 出站端，由 [`Client`](crate::client::Client) 拥有。
    Client,

    /// Inbound end, owned by a [`Server`](crate::server::Server).
    ///
    /// 入站端，由 [`Server`](crate::server::Server) 拥有。
    Server,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// Per-connection callback bundle.
///
/// Any callback returning an error tears down the connection it ran on;
/// other connections are unaffected.
///
/// 每连接回调集合。
///
/// 任何回调返回错误都会拆除它所运行的连接；其他连接不受影响。
#[async_trait]
pub trait Protocol: Send + Sync + Sized + 'static {
    /// Message type enqueued via [`Socket::write`].
    ///
    /// 通过 [`Socket::write`] 入队的消息类型。
    type Message: Send + 'static;

    /// Opaque per-connection state populated by [`handshake`](Self::handshake).
    ///
    /// 由 [`handshake`](Self::handshake) 填充的不透明每连接状态。
    type Context: Default + Send + Sync + 'static;

    /// Invoked once per connection before the read loop starts; the returned
    /// context becomes [`Socket::context`]. An error tears the connection
    /// down before it is considered established.
    ///
    /// 每条连接在读循环开始前调用一次；返回的上下文成为
    /// [`Socket::context`]。返回错误会在连接被视为建立之前将其拆除。
    async fn handshake(&self, side: Side, socket: &Socket<Self>) -> Result<Self::Context> {
        let _ = (side, socket);
        Ok(Self::Context::default())
    }

    /// Drives the inbound loop. Returning, normally or with an error,
    /// terminates the connection.
    ///
    /// 驱动入站循环。返回（无论正常或出错）即终止连接。
    async fn read(
        &self,
        side: Side,
        socket: &Socket<Self>,
        reader: &mut SocketReader,
    ) -> Result<()>;

    /// Encodes one batch of queued messages and is responsible for flushing
    /// the writer. The batch is everything the write queue held at wake-up,
    /// in FIFO order.
    ///
    /// 编码一批排队消息，并负责冲刷写入器。该批次是唤醒时写队列持有的
    /// 全部消息，按 FIFO 顺序。
    async fn write(
        &self,
        side: Side,
        socket: &Socket<Self>,
        writer: &mut SocketWriter,
        batch: &mut Vec<Self::Message>,
    ) -> Result<()>;

    /// Invoked exactly once per connection before its socket is torn down.
    ///
    /// 每条连接在其套接字被拆除之前恰好调用一次。
    async fn close(&self, side: Side, socket: &Socket<Self>) {
        let _ = (side, socket);
    }

    /// Invoked during pool purge with messages that were enqueued but never
    /// handed to [`write`](Self::write), in FIFO order.
    ///
    /// 在池 purge 期间调用，携带已入队但从未交给 [`write`](Self::write)
    /// 的消息，按 FIFO 顺序。
    async fn purge(&self, side: Side, socket: &Socket<Self>, leftover: Vec<Self::Message>) {
        let _ = (side, socket, leftover);
    }
}
