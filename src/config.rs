//! Runtime configuration for clients and servers.
//!
//! 客户端与服务端的运行时配置。

use std::num::NonZeroUsize;

/// Default client pool bound.
///
/// 默认客户端连接池上限。
pub const DEFAULT_MAX_CONNECTIONS_PER_CLIENT: usize = 16;

/// Default server pool bound; accepts beyond it are rejected.
///
/// 默认服务端连接池上限；超出后的 accept 会被拒绝。
pub const DEFAULT_MAX_CONNECTIONS_PER_SERVER: usize = 128;

/// Default per-connection write queue capacity.
///
/// 默认的每连接写队列容量。
pub const DEFAULT_WRITE_QUEUE_SIZE: usize = 128;

/// Default framing buffer capacity (both directions).
///
/// 默认的帧缓冲区容量（两个方向）。
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Per-pool configuration.
///
/// All sizes are fixed at construction; buffers and queues are allocated once
/// per connection and never grow.
///
/// 每个池的配置。
///
/// 所有尺寸在构造时固定；缓冲区和队列每连接分配一次，永不增长。
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on pool size. The server rejects accepts at the bound;
    /// the client multiplexes onto existing connections instead.
    ///
    /// 连接池大小上限。服务端在达到上限时拒绝 accept；
    /// 客户端则复用既有连接。
    pub max_connections: usize,

    /// Capacity of the per-connection write queue.
    ///
    /// 每连接写队列的容量。
    pub write_queue_size: NonZeroUsize,

    /// Reader framing buffer capacity; one frame must fit.
    ///
    /// 读帧缓冲区容量；单个帧必须放得下。
    pub read_buffer_size: usize,

    /// Writer framing buffer capacity.
    ///
    /// 写帧缓冲区容量。
    pub write_buffer_size: usize,
}

impl Config {
    /// Client defaults: 16 connections, queue of 128, 4 MiB buffers.
    ///
    /// 客户端默认值：16 条连接，128 容量队列，4 MiB 缓冲区。
    pub fn client() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS_PER_CLIENT,
            write_queue_size: NonZeroUsize::new(DEFAULT_WRITE_QUEUE_SIZE)
                .expect("default write queue size is non-zero"),
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Server defaults: 128 connections, queue of 128, 4 MiB buffers.
    ///
    /// 服务端默认值：128 条连接，128 容量队列，4 MiB 缓冲区。
    pub fn server() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS_PER_SERVER,
            ..Self::client()
        }
    }

    /// Override the pool bound.
    ///
    /// 覆盖连接池上限。
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Override the write queue capacity.
    ///
    /// 覆盖写队列容量。
    pub fn write_queue_size(mut self, size: NonZeroUsize) -> Self {
        self.write_queue_size = size;
        self
    }

    /// Override the reader buffer capacity.
    ///
    /// 覆盖读缓冲区容量。
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Override the writer buffer capacity.
    ///
    /// 覆盖写缓冲区容量。
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}
