//! 启动时构造一次、全程只读的网络层配置。

use std::time::Duration;

/// 网络服务层的全量配置值，进程启动时构造一次，随后以 `Arc` 共享给
/// 调度器、连接管理器与服务注册表。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 用一个显式的只读配置对象取代“全局可变设置”的旧模式，使每个组件的
///   行为来源在构造函数签名中可见；
/// - 刷写阈值与时间间隔共同约束输出延迟与单次 write 系统调用的开销，
///   二者必须成对出现在同一处配置里，避免调参时顾此失彼。
///
/// ## 契约 (What)
/// - `client_buf_size`：每条连接的读缓冲容量；缓冲写满而无法解出任何
///   完整帧时视为协议错误，该连接会被拆除；
/// - `out_buf_capacity`：共享输出缓冲的硬上限，追加永远不会越过它；
/// - `flush_threshold`：尺寸水位，追加后达到即触发刷写；
/// - `flush_interval`：时间水位，距上次刷写超过该时长且缓冲非空即刷写；
/// - `heartbeat_interval`：输出空闲超过该时长时注入一次心跳载荷；
/// - `poll_interval`：调度循环两趟之间的让出时长；
/// - `connect_timeout`：外拨连接的建连超时；
/// - `reconnect_interval`：外拨连接断开后的重试间隔，`None` 表示不重试
///   （转发器形态依赖退出策略而非重连）。
///
/// ## 注意事项 (Trade-offs)
/// - 默认值取自该类遥测转发进程的典型部署：200 ms 刷写、60 s 心跳、
///   100 ms 轮询，换取几十毫秒级的固定延迟与可忽略的 CPU 占用。
#[derive(Clone, Debug)]
pub struct NetConfig {
    /// 每条连接的读缓冲容量（字节）。
    pub client_buf_size: usize,
    /// 共享输出缓冲的容量上限（字节）。
    pub out_buf_capacity: usize,
    /// 输出缓冲的尺寸刷写水位（字节）。
    pub flush_threshold: usize,
    /// 输出缓冲的时间刷写水位。
    pub flush_interval: Duration,
    /// 输出空闲心跳间隔。
    pub heartbeat_interval: Duration,
    /// 调度循环的让出时长。
    pub poll_interval: Duration,
    /// 外拨建连超时。
    pub connect_timeout: Duration,
    /// 外拨断开后的重试间隔；`None` 关闭重试。
    pub reconnect_interval: Option<Duration>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            client_buf_size: 1024,
            out_buf_capacity: 16 * 1024,
            flush_threshold: 1400,
            flush_interval: Duration::from_millis(200),
            heartbeat_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: Some(Duration::from_secs(30)),
        }
    }
}
