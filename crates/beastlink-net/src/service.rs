//! 服务定义与服务/连接注册表。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::buffer::OutputBuffer;
use crate::client::{Client, ClientConn, ClientId, ClientRole, CloseReason, PusherSpec};
use crate::codec::ReadMode;
use crate::config::NetConfig;

/// 服务在注册表内的索引标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(pub(crate) usize);

/// 一个网络服务：共享同一读取模式与同一输出缓冲的一组连接。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 把“监听口、外拨口、裸描述符”这些来源各异的连接按行为归组：同组
///   连接用同一个解码器状态机读、从同一个输出缓冲收；
/// - 三个计数器分别回答三个运维问题：开了几个监听口、维持着几条外拨、
///   眼下有几条活动连接；转发器的退出策略直接读取最后一个。
///
/// ## 契约 (What)
/// - **不变式**：本服务所有连接共享恰好一种读取模式与至多一个输出缓冲；
/// - 服务在启动时创建、进程退出时销毁，中途不增删。
#[derive(Debug)]
pub struct NetService {
    name: &'static str,
    read_mode: ReadMode,
    writer: Option<OutputBuffer>,
    listener_count: usize,
    pusher_count: usize,
    connection_count: usize,
}

impl NetService {
    /// 服务的描述性名称。
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 服务的读取模式。
    pub fn read_mode(&self) -> ReadMode {
        self.read_mode
    }

    /// 监听套接字数量。
    pub fn listener_count(&self) -> usize {
        self.listener_count
    }

    /// 维持中的外拨连接数量。
    pub fn pusher_count(&self) -> usize {
        self.pusher_count
    }

    /// 活动连接数量。
    pub fn connection_count(&self) -> usize {
        self.connection_count
    }

    /// 是否携带共享输出缓冲。
    pub fn has_writer(&self) -> bool {
        self.writer.is_some()
    }
}

/// 服务与连接的唯一属主：索引稳定的记录集合，替代侵入式链表。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 拆除连接与遍历连接都发生在同一逻辑线程的同一趟调度里，用“先收集
///   id、再统一删除”的两段式操作杜绝边遍历边释放的悬垂问题；
/// - `append_output` 在这里而不在 [`OutputBuffer`] 上实现“满则先刷写”，
///   因为刷写必须触达属主服务的全部连接。
///
/// ## 契约 (What)
/// - 仅由调度器的单一控制流修改；
/// - `remove_client` 负责计数器回退与外拨孤儿登记，调用方无须补偿；
/// - 所有操作都不阻塞。
#[derive(Debug)]
pub struct Registry {
    services: Vec<NetService>,
    clients: HashMap<ClientId, Client>,
    next_client: u64,
    orphaned_pushers: Vec<(ServiceId, PusherSpec)>,
    config: Arc<NetConfig>,
}

impl Registry {
    /// 以共享配置构造空注册表。
    pub fn new(config: Arc<NetConfig>) -> Self {
        Self {
            services: Vec::new(),
            clients: HashMap::new(),
            next_client: 0,
            orphaned_pushers: Vec::new(),
            config,
        }
    }

    /// 登记一个服务。进程的每个逻辑角色（例如“遥测输入”“记录输出”）
    /// 启动时各登记一次。
    pub fn add_service(
        &mut self,
        name: &'static str,
        read_mode: ReadMode,
        writer: Option<OutputBuffer>,
    ) -> ServiceId {
        let id = ServiceId(self.services.len());
        self.services.push(NetService {
            name,
            read_mode,
            writer,
            listener_count: 0,
            pusher_count: 0,
            connection_count: 0,
        });
        info!(service = name, ?read_mode, "service registered");
        id
    }

    /// 按标识取服务。
    pub fn service(&self, id: ServiceId) -> &NetService {
        &self.services[id.0]
    }

    /// 按标识取连接（可能已被拆除）。
    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub(crate) fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(&id)
    }

    /// 当前全部连接的 id 快照，遍历期间的拆除不会使快照失效。
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort();
        ids
    }

    /// 指定服务的活动连接数。
    pub fn connection_count(&self, id: ServiceId) -> usize {
        self.services[id.0].connection_count
    }

    /// 携带输出缓冲的服务集合。
    pub fn writer_services(&self) -> Vec<ServiceId> {
        self.services
            .iter()
            .enumerate()
            .filter(|(_, s)| s.writer.is_some())
            .map(|(i, _)| ServiceId(i))
            .collect()
    }

    pub(crate) fn listener_opened(&mut self, id: ServiceId) {
        self.services[id.0].listener_count += 1;
    }

    /// 接管一条新连接，维护相应计数器。
    pub(crate) fn insert_client(
        &mut self,
        service: ServiceId,
        conn: ClientConn,
        role: ClientRole,
        peer: String,
    ) -> ClientId {
        let id = ClientId(self.next_client);
        self.next_client += 1;

        let entry = &mut self.services[service.0];
        entry.connection_count += 1;
        if matches!(role, ClientRole::Pusher(_)) {
            entry.pusher_count += 1;
        }
        debug!(
            service = entry.name,
            client = %id,
            peer = %peer,
            connections = entry.connection_count,
            "client attached"
        );

        let client = Client::new(id, service, conn, role, peer, self.config.client_buf_size);
        self.clients.insert(id, client);
        id
    }

    /// 拆除一条连接：关闭载体、解除挂接、回退计数器。
    ///
    /// 外拨连接的拨号参数会登记为“孤儿”，由连接管理器决定是否按重试
    /// 间隔重新外拨。
    pub(crate) fn remove_client(&mut self, id: ClientId, reason: CloseReason) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        let service = client.service();
        let entry = &mut self.services[service.0];
        entry.connection_count = entry.connection_count.saturating_sub(1);

        match reason {
            CloseReason::Eof => debug!(
                service = entry.name,
                client = %id,
                peer = client.peer(),
                "client closed by peer"
            ),
            reason => warn!(
                service = entry.name,
                client = %id,
                peer = client.peer(),
                ?reason,
                "client torn down"
            ),
        }

        if let ClientRole::Pusher(spec) = client.into_role() {
            entry.pusher_count = entry.pusher_count.saturating_sub(1);
            self.orphaned_pushers.push((service, spec));
        }
        // 载体随 Client 一起 drop，描述符在此关闭。
    }

    /// 取走因拆除而失去连接的外拨参数。
    pub(crate) fn drain_orphaned_pushers(&mut self) -> Vec<(ServiceId, PusherSpec)> {
        std::mem::take(&mut self.orphaned_pushers)
    }

    /// 向服务的共享输出缓冲追加渲染结果。
    ///
    /// 语义与约束（对应缓冲层的不变式）：
    /// - 追加若会越过容量，先强制刷写一次再追加；
    /// - 刷写后仍放不下的部分被截断并记录一条本地错误日志，绝不阻塞；
    /// - 追加后达到尺寸水位立即刷写，压住高流量下的延迟。
    pub fn append_output(&mut self, id: ServiceId, bytes: &[u8], now: Instant) {
        let Some(writer) = self.services[id.0].writer.as_ref() else {
            return;
        };
        if bytes.len() > writer.remaining() {
            self.flush_service(id, now);
        }

        let entry = &mut self.services[id.0];
        let Some(writer) = entry.writer.as_mut() else {
            return;
        };
        let appended = writer.push(bytes);
        if appended < bytes.len() {
            warn!(
                service = entry.name,
                dropped = bytes.len() - appended,
                capacity = writer.capacity(),
                "output record truncated"
            );
        }
        if writer.used() >= self.config.flush_threshold {
            self.flush_service(id, now);
        }
    }

    /// 把服务缓冲的全部内容交付给它的每条连接，然后清空缓冲。
    ///
    /// 单条连接写失败只拆除那一条，不中断对其余连接的交付。
    pub fn flush_service(&mut self, id: ServiceId, now: Instant) {
        let snapshot = {
            let Some(writer) = self.services[id.0].writer.as_mut() else {
                return;
            };
            if writer.is_empty() {
                return;
            }
            writer.take(now)
        };

        let mut dead = Vec::new();
        for client in self.clients.values_mut() {
            if client.service() != id {
                continue;
            }
            if let Err(reason) = client.write_all(&snapshot) {
                dead.push((client.id(), reason));
            }
        }
        for (client, reason) in dead {
            self.remove_client(client, reason);
        }
    }

    /// 服务输出空闲超过心跳间隔时，注入一次保活载荷并立即刷写。
    pub fn maybe_heartbeat(&mut self, id: ServiceId, now: Instant) {
        let payload = {
            let Some(writer) = self.services[id.0].writer.as_ref() else {
                return;
            };
            writer.heartbeat_due(now, self.config.heartbeat_interval)
        };
        let Some(payload) = payload else {
            return;
        };
        debug!(service = self.services[id.0].name, "heartbeat queued");
        self.append_output(id, payload, now);
        self.flush_service(id, now);
    }

    /// 服务缓冲是否到达时间刷写水位。
    pub fn flush_due(&self, id: ServiceId, now: Instant) -> bool {
        self.services[id.0]
            .writer
            .as_ref()
            .is_some_and(|w| w.flush_due(now, self.config.flush_interval))
    }
}
