//! # lite-net
//!
//! Lightweight asynchronous TCP networking framework for Rust.
//!
//! 轻量级的 Rust 异步 TCP 网络框架。
//!
//! ## Overview / 概述
//!
//! `lite-net` turns a user-supplied *protocol*, a small bundle of callbacks
//! defining framing and per-connection behavior, into a running client or
//! server. Under the hood it is three tightly coupled layers, each built for
//! low latency and minimal allocation:
//!
//! 1. **Cooperative synchronization**: a single-waiter event with latched
//!    notification, a counter that releases its waiter on returning to zero,
//!    and a bounded ring queue with blocking push, drain-all pop, and
//!    graceful shutdown.
//! 2. **Per-connection socket runtime**: a framing reader driven by the
//!    protocol, and a batching writer task fed by the write queue.
//! 3. **Adaptive connection pools**: a capacity-limited inbound pool behind
//!    an accept loop, and an outbound pool with least-loaded dispatch and
//!    lazy connects.
//!
//! `lite-net` 将用户提供的*协议*（一组定义帧格式与每连接行为的回调）
//! 变成一个运行中的客户端或服务端。其内部是三个紧密耦合的层次，
//! 全部为低延迟与最小分配而构建：
//!
//! 1. **协作式同步**：带锁存通知的单等待者事件、归零时释放等待者的
//!    计数器、以及支持阻塞推入/全量排空弹出/优雅关闭的有界环形队列。
//! 2. **每连接套接字运行时**：由协议驱动的帧读取器，以及由写队列
//!    喂养的批量写出任务。
//! 3. **自适应连接池**：accept 循环背后容量受限的入站池，以及按最小
//!    负载分发、惰性建连的出站池。
//!
//! ## Key Features / 主要特性
//!
//! - **Bounded memory with backpressure**: every write queue and framing
//!   buffer is fixed-size; a full queue suspends the producer
//! - **Batching writer**: one wake-up encodes everything queued, not one
//!   message at a time
//! - **No allocation on the message path**: buffers and queue slots are
//!   allocated once per connection
//! - **Disciplined teardown**: connection tasks self-remove, exited
//!   connections are reclaimed by an explicit purge step, and undelivered
//!   messages are surfaced to the protocol instead of silently dropped
//!
//! - **有界内存与背压**：每个写队列和帧缓冲区都是固定大小；队列满时
//!   挂起生产者
//! - **批量写出**：一次唤醒编码全部排队消息，而不是逐条处理
//! - **消息路径零分配**：缓冲区与队列槽位每连接只分配一次
//! - **有纪律的拆除**：连接任务自我移除，已退出连接由显式的 purge
//!   步骤回收，未送达的消息交还给协议而不是悄悄丢弃
//!
//! ## Modules / 模块
//!
//! ### [`protocol`], [`client`], [`server`]
//!
//! The user surface: implement [`protocol::Protocol`] (its `read` drives the
//! inbound loop, its `write` encodes outbound batches), then hand it to a
//! [`client::Client`] or [`server::Server`].
//!
//! 用户表面：实现 [`protocol::Protocol`]（其 `read` 驱动入站循环，其
//! `write` 编码出站批次），再交给 [`client::Client`] 或
//! [`server::Server`]。
//!
//! ### [`event`], [`counter`], [`queue`], [`mutex`]
//!
//! The synchronization layer. Usable on their own, and exercised heavily by
//! the socket runtime and the pools.
//!
//! 同步层。可独立使用，同时被套接字运行时与连接池大量使用。
//!
//! ### [`buffer`], [`socket`]
//!
//! Fixed-capacity framing over a byte stream, and the per-connection runtime
//! pairing one reader loop with one writer task.
//!
//! 字节流之上的固定容量帧处理，以及将一个读循环与一个写出任务配对的
//! 每连接运行时。
//!
//! ## Example / 示例
//!
//! A newline-framed echo pair:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use lite_net::client::Client;
//! use lite_net::config::Config;
//! use lite_net::error::Result;
//! use lite_net::protocol::{Protocol, Side, SocketReader, SocketWriter};
//! use lite_net::server::Server;
//! use lite_net::socket::Socket;
//!
//! struct LineEcho;
//!
//! #[async_trait]
//! impl Protocol for LineEcho {
//!     type Message = Vec<u8>;
//!     type Context = ();
//!
//!     async fn read(
//!         &self,
//!         side: Side,
//!         socket: &Socket<Self>,
//!         reader: &mut SocketReader,
//!     ) -> Result<()> {
//!         loop {
//!             let line = reader.read_line().await?.to_vec();
//!             if side == Side::Server {
//!                 // Echo the line back through the write queue.
//!                 socket.write(line.clone()).await?;
//!             }
//!             reader.shift(line.len());
//!         }
//!     }
//!
//!     async fn write(
//!         &self,
//!         _side: Side,
//!         _socket: &Socket<Self>,
//!         writer: &mut SocketWriter,
//!         batch: &mut Vec<Vec<u8>>,
//!     ) -> Result<()> {
//!         for message in batch.iter() {
//!             writer.write(message).await?;
//!         }
//!         writer.flush().await
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let server = Server::bind("127.0.0.1:0".parse().unwrap(), LineEcho, Config::server())?;
//! server.serve()?;
//!
//! let client = Client::new(server.local_addr(), LineEcho, Config::client());
//! client.write(b"hello\n".to_vec()).await?;
//!
//! client.shutdown().await;
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model / 并发模型
//!
//! All primitives are fully thread-safe, so the framework runs unchanged on
//! single- or multi-threaded tokio runtimes. The single-waiter contracts of
//! [`event::Event`] are upheld structurally: each write queue has exactly
//! one popping task (the connection's writer task), and each shutdown event
//! exactly one waiter (the connection's read loop).
//!
//! 所有原语都是完全线程安全的，因此框架在单线程或多线程 tokio 运行时
//! 上均可不加修改地运行。[`event::Event`] 的单等待者契约由结构保证：
//! 每个写队列恰有一个弹出任务（连接的写出任务），每个关闭事件恰有一个
//! 等待者（连接的读循环）。

pub mod buffer;
pub mod client;
pub mod config;
pub mod counter;
pub mod error;
pub mod event;
pub mod mutex;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod socket;

mod pool;
mod shim;
