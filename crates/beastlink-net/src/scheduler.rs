//! 单线程协作式调度循环与停机控制。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::time::sleep;
use tracing::info;

use crate::client::{ClientId, CloseReason, ReadOutcome};
use crate::codec::{Decoded, ReadMode, decode_stream};
use crate::config::NetConfig;
use crate::manager::ConnectionManager;
use crate::pipeline::{FrameInput, MessagePipeline};
use crate::service::{Registry, ServiceId};

/// 进程级停机标志：由信号处理设置，调度器每趟轮询一次。
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// 构造未置位的标志。
    pub fn new() -> Self {
        Self::default()
    }

    /// 请求停机；当前趟调度完成后循环退出。
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// 是否已请求停机。
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 调度循环的退出策略。
#[derive(Clone, Debug)]
pub enum ExitPolicy {
    /// 常驻服务：只有停机标志能结束循环。
    Persistent,
    /// 瞬态桥接：任一指定服务的活动连接数降到零即退出
    /// （转发器形态：输入或输出任何一侧断开，进程就没有存在意义）。
    RequireConnections(Vec<ServiceId>),
}

/// 单线程协作式调度器：一个逻辑控制流驱动全部 I/O 与例行维护。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 正确性依赖“每趟工作量有界 + 单控制流”，而不是锁：注册表、输出
///   缓冲、连接缓冲只被这一个控制流触碰；
/// - 趟与趟之间以有界睡眠让出，换取可忽略的 CPU 占用，代价是几十毫秒
///   级的固定延迟上界。
///
/// ## 逻辑 (How)
/// 每趟按固定顺序执行：
/// 1. 接纳就绪的监听连接，然后对全部可读连接做非阻塞读取，完整单元
///    经解码器进入外部流水线，渲染结果追加到各输出服务的共享缓冲；
/// 2. 流水线例行维护钩子；
/// 3. 逐服务检查时间刷写水位与空闲心跳；
/// 4. 重试到期的外拨连接。
///
/// ## 契约 (What)
/// - 同一连接流内的单元严格按到达顺序处理；同一次刷写内所有连接收到
///   相同内容，但不同连接之间没有跨连接的先后保证；
/// - 组件局部错误（连接、协议）在本趟内就地消化，绝不跨趟传播；
/// - 停机时丢弃未凑齐的半帧，不做最后刷写。
pub struct Scheduler<P: MessagePipeline> {
    registry: Registry,
    manager: ConnectionManager,
    pipeline: P,
    config: Arc<NetConfig>,
    shutdown: ShutdownFlag,
    exit: ExitPolicy,
}

impl<P: MessagePipeline> Scheduler<P> {
    /// 组装调度器。注册表与连接管理器在此之前完成启动期布线
    /// （登记服务、开启监听、建立外拨）。
    pub fn new(
        registry: Registry,
        manager: ConnectionManager,
        pipeline: P,
        config: Arc<NetConfig>,
        shutdown: ShutdownFlag,
        exit: ExitPolicy,
    ) -> Self {
        Self {
            registry,
            manager,
            pipeline,
            config,
            shutdown,
            exit,
        }
    }

    /// 注册表视图。
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 可变注册表视图（测试与停机收尾用）。
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// 连接管理器视图。
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// 可变连接管理器视图。
    pub fn manager_mut(&mut self) -> &mut ConnectionManager {
        &mut self.manager
    }

    /// 同时借出注册表与连接管理器，供运行期追加挂接或监听。
    pub fn wiring_mut(&mut self) -> (&mut Registry, &mut ConnectionManager) {
        (&mut self.registry, &mut self.manager)
    }

    /// 流水线视图。
    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    /// 驱动循环直到停机或退出策略命中。
    pub async fn run(&mut self) {
        info!("scheduler running");
        loop {
            if self.shutdown.is_requested() {
                info!("shutdown requested, exiting after current pass");
                break;
            }
            self.pass(Instant::now()).await;
            if self.exit_condition_met() {
                break;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// 执行一趟调度。`now` 显式传入，刷写与心跳计时因此可测。
    pub async fn pass(&mut self, now: Instant) {
        self.manager.poll_accepts(&mut self.registry);
        self.read_pass(now);
        self.pipeline.periodic(now);
        for service in self.registry.writer_services() {
            if self.registry.flush_due(service, now) {
                self.registry.flush_service(service, now);
            }
            self.registry.maybe_heartbeat(service, now);
        }
        self.manager.adopt_orphans(&mut self.registry, now);
        self.manager.retry_pushers(&mut self.registry, now).await;
    }

    fn exit_condition_met(&self) -> bool {
        let ExitPolicy::RequireConnections(services) = &self.exit else {
            return false;
        };
        for &service in services {
            if self.registry.connection_count(service) == 0 {
                info!(
                    service = self.registry.service(service).name(),
                    "required service has no connections, exiting"
                );
                return true;
            }
        }
        false
    }

    /// 对每条可读连接做非阻塞读取并分发解出的完整单元。
    fn read_pass(&mut self, now: Instant) {
        for id in self.registry.client_ids() {
            let Some(client) = self.registry.client(id) else {
                continue;
            };
            if !client.is_readable() {
                continue;
            }
            let mode = self.registry.service(client.service()).read_mode();
            if matches!(mode, ReadMode::Ignore) {
                continue;
            }

            let mut units = Vec::new();
            let mut close = None;
            while let Some(client) = self.registry.client_mut(id) {
                match client.try_fill() {
                    ReadOutcome::Data(_) => {
                        let consumed = decode_stream(mode, client.buffered_bytes(), &mut units);
                        client.consume(consumed);
                        if consumed == 0 && client.buffer_full() {
                            close = Some(CloseReason::Protocol(
                                "read buffer full with no complete unit",
                            ));
                            break;
                        }
                    }
                    ReadOutcome::WouldBlock => break,
                    ReadOutcome::Eof => {
                        close = Some(CloseReason::Eof);
                        break;
                    }
                    ReadOutcome::Failed(err) => {
                        close = Some(CloseReason::Read(err));
                        break;
                    }
                }
            }

            self.dispatch(id, units, now);
            if let Some(reason) = close {
                self.registry.remove_client(id, reason);
            }
        }
    }

    fn dispatch(&mut self, source: ClientId, units: Vec<Decoded>, now: Instant) {
        for unit in units {
            match unit {
                Decoded::Frame(frame) => self.feed(FrameInput::Binary(&frame), now),
                Decoded::Record(record) => self.feed(FrameInput::Line(&record), now),
                Decoded::Command(option) => self.apply_command(source, option),
            }
        }
    }

    /// 一个单元走完“解码 → 航迹 → 渲染 → 追加输出”的完整通路。
    fn feed(&mut self, input: FrameInput<'_>, now: Instant) {
        let Some(message) = self.pipeline.decode(input) else {
            return;
        };
        self.pipeline.track(&message);
        let Some(record) = self.pipeline.render(&message) else {
            return;
        };
        for service in self.registry.writer_services() {
            self.registry.append_output(service, &record, now);
        }
    }

    /// 命令帧：连接级选项就地生效，其余交给流水线。
    fn apply_command(&mut self, source: ClientId, option: u8) {
        match option {
            b'J' | b'j' => {
                if let Some(client) = self.registry.client_mut(source) {
                    client.wants_modeac = option == b'J';
                }
            }
            other => self.pipeline.handle_option(other),
        }
    }
}
