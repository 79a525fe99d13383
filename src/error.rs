//! Framework error surface.
//!
//! Per-operation queue errors ([`PushError`](crate::queue::PushError),
//! [`PopError`](crate::queue::PopError)) live next to the queue and carry
//! rejected values back; everything that crosses the framework boundary is
//! folded into [`Error`].
//!
//! 框架的错误表面。
//!
//! 队列的逐操作错误（[`PushError`](crate::queue::PushError)、
//! [`PopError`](crate::queue::PopError)）与队列放在一起并将被拒绝的值
//! 带回；所有跨越框架边界的错误都归入 [`Error`]。

use std::fmt;
use std::io;

/// Convenience alias used across the framework.
///
/// 框架内通用的别名。
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for framework operations.
///
/// 框架操作的错误类型。
pub enum Error {
    /// The subsystem is shutting down; terminal for the caller.
    ///
    /// 子系统正在关闭；对调用者而言是终态。
    Cancelled,

    /// The pool is full; the incoming connection was dropped and the
    /// listener keeps accepting.
    ///
    /// 连接池已满；入站连接被丢弃，监听器继续接受。
    ConnectionLimit,

    /// A single frame exceeded the reader buffer capacity.
    ///
    /// 单个帧超出了读缓冲区容量。
    BufferOverflow,

    /// The peer closed, or the socket reported zero bytes.
    ///
    /// 对端关闭，或套接字报告了零字节。
    EndOfStream,

    /// A writer reservation exceeded the buffer capacity.
    ///
    /// 写缓冲区预留超出了缓冲区容量。
    RequestedSizeTooLarge,

    /// A protocol callback failed.
    ///
    /// 协议回调失败。
    Protocol(String),

    /// Underlying socket error, passed through.
    ///
    /// 底层套接字错误，原样透传。
    Io(io::Error),
}

impl Error {
    /// Build a protocol-level error from any message.
    ///
    /// 从任意消息构造协议级错误。
    pub fn protocol<M: Into<String>>(msg: M) -> Self {
        Error::Protocol(msg.into())
    }

    /// Whether this error means the subsystem is shutting down.
    ///
    /// 该错误是否表示子系统正在关闭。
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::ConnectionLimit => write!(f, "connection limit exceeded"),
            Error::BufferOverflow => write!(f, "frame exceeds read buffer capacity"),
            Error::EndOfStream => write!(f, "end of stream"),
            Error::RequestedSizeTooLarge => {
                write!(f, "requested reservation exceeds write buffer capacity")
            }
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Io(err) => write!(f, "socket error: {err}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
