//! 服务级共享输出缓冲与空闲心跳策略。

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::codec::BEAST_KEEPALIVE;

/// 空闲心跳策略：固定的封闭变体集合，按 `match` 分发。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatPolicy {
    /// 不发送心跳。
    None,
    /// 注入一个全零 Mode-A/C 帧作为保活载荷。
    BeastKeepalive,
}

impl HeartbeatPolicy {
    /// 该策略对应的保活载荷；`None` 策略不产生载荷。
    pub fn payload(self) -> Option<&'static [u8]> {
        match self {
            Self::None => None,
            Self::BeastKeepalive => Some(&BEAST_KEEPALIVE),
        }
    }
}

/// 一个服务全部连接共享的输出缓冲。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 同一服务的 N 条下游连接收到的是同一份字节流，渲染结果只需写入一次，
///   刷写时再分发给每条连接，把每帧 N 次系统调用摊薄为每次刷写 N 次；
/// - 尺寸水位与时间水位（由调度器在外部检查）共同保证：高流量下单次
///   write 足够大，低流量下延迟有上界。
///
/// ## 契约 (What)
/// - **不变式**：任何操作返回后 `used() <= capacity`；
/// - `push` 只追加放得下的前缀并返回实际追加量——“先刷写再追加、仍放
///   不下则截断并记录本地错误”的完整语义由注册表的 `append_output`
///   实现，因为刷写必须触达属主服务的连接集合；
/// - `take` 交出当前内容的只读快照、清空使用量并记下刷写时刻；
/// - 心跳只在缓冲完全空闲时注入，真实数据一旦到达，心跳计时自然后移。
///
/// ## 注意事项 (Trade-offs)
/// - 快照是 `Bytes`，分发给多条连接时只克隆引用计数，不复制字节。
#[derive(Debug)]
pub struct OutputBuffer {
    data: BytesMut,
    capacity: usize,
    last_flush: Instant,
    heartbeat: HeartbeatPolicy,
}

impl OutputBuffer {
    /// 以给定容量与心跳策略构造缓冲；`now` 作为初始的“上次刷写”时刻。
    pub fn new(capacity: usize, heartbeat: HeartbeatPolicy, now: Instant) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            capacity,
            last_flush: now,
            heartbeat,
        }
    }

    /// 当前已缓冲的字节数。
    pub fn used(&self) -> usize {
        self.data.len()
    }

    /// 缓冲是否为空。
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 容量上限。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 还能追加的字节数。
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// 上次刷写（或构造）的时刻。
    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// 追加 `bytes` 中放得下的前缀，返回实际追加的字节数。
    pub(crate) fn push(&mut self, bytes: &[u8]) -> usize {
        let take = bytes.len().min(self.remaining());
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    /// 取走全部内容作为只读快照，清空使用量并记录刷写时刻。
    pub(crate) fn take(&mut self, now: Instant) -> Bytes {
        self.last_flush = now;
        self.data.split().freeze()
    }

    /// 缓冲非空且距上次刷写超过 `interval` 时，时间水位到期。
    pub fn flush_due(&self, now: Instant, interval: Duration) -> bool {
        !self.data.is_empty() && now.duration_since(self.last_flush) >= interval
    }

    /// 缓冲空闲超过 `interval` 时返回应注入的心跳载荷。
    pub fn heartbeat_due(&self, now: Instant, interval: Duration) -> Option<&'static [u8]> {
        if !self.data.is_empty() || now.duration_since(self.last_flush) < interval {
            return None;
        }
        self.heartbeat.payload()
    }
}
