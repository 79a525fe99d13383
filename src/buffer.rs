//! Fixed-capacity framing buffers layered over a byte stream.
//!
//! [`Reader`] accumulates socket bytes until the protocol's delimiter shows
//! up and lends the frame out as a slice; [`Writer`] lends out reserved
//! spans of its buffer for in-place encoding and drains to the socket when
//! room runs out. Both own a single fixed allocation for the lifetime of the
//! connection; framing itself never allocates.
//!
//! Both are generic over the stream so unit tests can drive them through
//! `tokio::io::duplex`; the socket runtime instantiates them over the two
//! halves of a `TcpStream`.
//!
//! 在字节流之上的固定容量帧缓冲区。
//!
//! [`Reader`] 累积套接字字节，直到协议的分隔符出现，并以切片形式借出
//! 该帧；[`Writer`] 借出其缓冲区中预留的区段用于原地编码，并在空间
//! 不足时向套接字排水。两者在连接的整个生命周期内只持有一块固定分配；
//! 帧处理本身从不分配内存。
//!
//! 两者对流泛型化，单元测试可以用 `tokio::io::duplex` 驱动；
//! 套接字运行时用 `TcpStream` 的两个半边实例化它们。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Buffered framing reader.
///
/// Frame slices returned by [`read_until`](Self::read_until) and
/// [`peek`](Self::peek) stay valid until the next [`shift`](Self::shift).
///
/// 带缓冲的帧读取器。
///
/// [`read_until`](Self::read_until) 与 [`peek`](Self::peek) 返回的帧
/// 切片在下一次 [`shift`](Self::shift) 之前保持有效。
pub struct Reader<R> {
    io: R,
    buf: Box<[u8]>,
    filled: usize,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    /// Wrap `io` with a buffer of `capacity` bytes.
    ///
    /// 以 `capacity` 字节的缓冲区包装 `io`。
    pub fn new(io: R, capacity: usize) -> Self {
        Self {
            io,
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Read until `delim` appears; returns the frame **including** the
    /// delimiter.
    ///
    /// The frame is not consumed; call [`shift`](Self::shift) with its
    /// length once done with it, or the next call returns it again.
    ///
    /// # Errors
    /// [`Error::BufferOverflow`] when the buffer fills without a match,
    /// [`Error::EndOfStream`] on a zero-length read, [`Error::Io`] otherwise.
    ///
    /// 读取直到 `delim` 出现；返回**包含**分隔符的帧。
    ///
    /// 该帧不会被消费；用完后以其长度调用 [`shift`](Self::shift)，
    /// 否则下一次调用会再次返回它。
    ///
    /// # 错误
    /// 缓冲区填满仍无匹配时返回 [`Error::BufferOverflow`]，零长度读取
    /// 返回 [`Error::EndOfStream`]，其余为 [`Error::Io`]。
    pub async fn read_until(&mut self, delim: u8) -> Result<&[u8]> {
        let mut scanned = 0;

        let end = loop {
            if let Some(pos) = self.buf[scanned..self.filled]
                .iter()
                .position(|&b| b == delim)
            {
                break scanned + pos + 1;
            }
            scanned = self.filled;

            if self.filled == self.buf.len() {
                return Err(Error::BufferOverflow);
            }
            let n = self.io.read(&mut self.buf[self.filled..]).await?;
            if n == 0 {
                return Err(Error::EndOfStream);
            }
            self.filled += n;
        };

        Ok(&self.buf[..end])
    }

    /// `read_until(b'\n')`.
    #[inline]
    pub async fn read_line(&mut self) -> Result<&[u8]> {
        self.read_until(b'\n').await
    }

    /// Ensure at least `n` bytes are buffered and return them.
    ///
    /// # Errors
    /// [`Error::BufferOverflow`] if `n` exceeds the buffer capacity.
    ///
    /// 确保至少缓冲 `n` 字节并返回它们。
    ///
    /// # 错误
    /// `n` 超出缓冲区容量时返回 [`Error::BufferOverflow`]。
    pub async fn peek(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.buf.len() {
            return Err(Error::BufferOverflow);
        }
        while self.filled < n {
            let read = self.io.read(&mut self.buf[self.filled..]).await?;
            if read == 0 {
                return Err(Error::EndOfStream);
            }
            self.filled += read;
        }
        Ok(&self.buf[..n])
    }

    /// Discard the first `n` buffered bytes, compacting the rest.
    ///
    /// Invalidates previously returned frame slices.
    ///
    /// 丢弃缓冲区前 `n` 个字节并压实其余部分。
    ///
    /// 使先前返回的帧切片失效。
    pub fn shift(&mut self, n: usize) {
        debug_assert!(n <= self.filled);
        let n = n.min(self.filled);
        self.buf.copy_within(n..self.filled, 0);
        self.filled -= n;
    }

    /// Currently buffered bytes.
    ///
    /// 当前已缓冲的字节。
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Buffer capacity.
    ///
    /// 缓冲区容量。
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl<R> std::fmt::Debug for Reader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("filled", &self.filled)
            .field("capacity", &self.buf.len())
            .finish()
    }
}

/// Buffered framing writer.
///
/// 带缓冲的帧写入器。
pub struct Writer<W> {
    io: W,
    buf: Box<[u8]>,
    pos: usize,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    /// Wrap `io` with a buffer of `capacity` bytes.
    ///
    /// 以 `capacity` 字节的缓冲区包装 `io`。
    pub fn new(io: W, capacity: usize) -> Self {
        Self {
            io,
            buf: vec![0u8; capacity].into_boxed_slice(),
            pos: 0,
        }
    }

    /// Reserve exactly `n` bytes and return them as a writable slice.
    ///
    /// The reservation is committed immediately; fill it before the next
    /// [`flush`](Self::flush). If fewer than `n` bytes remain, buffered
    /// bytes are drained to the socket first.
    ///
    /// # Errors
    /// [`Error::RequestedSizeTooLarge`] if `n` exceeds the buffer capacity.
    ///
    /// 精确预留 `n` 个字节并作为可写切片返回。
    ///
    /// 预留立即生效；请在下一次 [`flush`](Self::flush) 之前填充它。
    /// 若剩余空间不足 `n` 字节，则先将已缓冲字节排水到套接字。
    ///
    /// # 错误
    /// `n` 超出缓冲区容量时返回 [`Error::RequestedSizeTooLarge`]。
    pub async fn peek(&mut self, n: usize) -> Result<&mut [u8]> {
        if n > self.buf.len() {
            return Err(Error::RequestedSizeTooLarge);
        }
        if self.buf.len() - self.pos < n {
            self.shift(self.buf.len() - n).await?;
        }
        let start = self.pos;
        self.pos += n;
        Ok(&mut self.buf[start..start + n])
    }

    /// Copy `data` into the buffer, draining first if needed.
    ///
    /// # Errors
    /// [`Error::RequestedSizeTooLarge`] if `data` exceeds the buffer
    /// capacity.
    ///
    /// 将 `data` 复制进缓冲区，必要时先排水。
    ///
    /// # 错误
    /// `data` 超出缓冲区容量时返回 [`Error::RequestedSizeTooLarge`]。
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let dst = self.peek(data.len()).await?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Drain the whole buffer to the socket and flush it.
    ///
    /// 将整个缓冲区排水到套接字并冲刷。
    pub async fn flush(&mut self) -> Result<()> {
        self.shift(0).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Drain until at most `required_leftover` bytes remain buffered.
    ///
    /// A zero-byte socket write during the drain is reported as
    /// [`Error::EndOfStream`].
    ///
    /// 排水直到缓冲区中至多剩余 `required_leftover` 字节。
    ///
    /// 排水期间套接字的零字节写入报告为 [`Error::EndOfStream`]。
    pub async fn shift(&mut self, required_leftover: usize) -> Result<()> {
        if self.pos <= required_leftover {
            return Ok(());
        }
        let drain = self.pos - required_leftover;

        let mut written = 0;
        while written < drain {
            let n = self.io.write(&self.buf[written..drain]).await?;
            if n == 0 {
                return Err(Error::EndOfStream);
            }
            written += n;
        }

        self.buf.copy_within(drain..self.pos, 0);
        self.pos -= drain;
        Ok(())
    }

    /// Bytes currently buffered and not yet drained.
    ///
    /// 当前已缓冲且尚未排水的字节数。
    #[inline]
    pub fn buffered(&self) -> usize {
        self.pos
    }

    /// Buffer capacity.
    ///
    /// 缓冲区容量。
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl<W> std::fmt::Debug for Writer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("buffered", &self.pos)
            .field("capacity", &self.buf.len())
            .finish()
    }
}
