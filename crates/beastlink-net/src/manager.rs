//! 连接生命周期管理：监听、外拨重试与裸描述符挂接。

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::{ClientConn, ClientId, ClientRole, PusherSpec};
use crate::codec::encode_settings;
use crate::config::NetConfig;
use crate::error::{NetError, classify_connect_error};
use crate::service::{Registry, ServiceId};

/// 一次待执行的外拨重试。
#[derive(Debug)]
struct PendingDial {
    service: ServiceId,
    spec: PusherSpec,
    due: Instant,
}

/// 连接的生产者：监听、外拨、挂接裸描述符，以及外拨断开后的重试。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 三种连接来源（accept、connect、预先打开的描述符）统一汇入注册表，
///   此后调度器对它们一视同仁；
/// - 外拨重试挂在显式的到期队列上，由调度器每趟驱动一次，配合重试
///   间隔天然形成退避，绝不忙转。
///
/// ## 契约 (What)
/// - `listen`/`connect` 在启动期失败时把错误原样交还调用方，由进程入口
///   决定是否致命退出；
/// - 建立的每个套接字都置为 keepalive 并关闭 Nagle；
/// - `connect` 成功后立即发送配置的设置字符串；重试成功后同样重发。
///
/// ## 注意事项 (Trade-offs)
/// - accept 的就绪检查在每趟调度里轮询一次，新连接的接纳延迟以轮询
///   间隔为上界，换取单线程模型下无需任何唤醒机制。
#[derive(Debug)]
pub struct ConnectionManager {
    config: Arc<NetConfig>,
    listeners: Vec<(ServiceId, TcpListener)>,
    pending: Vec<PendingDial>,
}

impl ConnectionManager {
    /// 以共享配置构造连接管理器。
    pub fn new(config: Arc<NetConfig>) -> Self {
        Self {
            config,
            listeners: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// 在 `bind_addr` 上按逗号分隔的端口表开启监听套接字。
    ///
    /// 每个端口一个被动套接字；此后被 accept 的连接都成为 `service`
    /// 的客户端。任何一个端口绑定失败都立即返回错误（启动期致命）。
    pub async fn listen(
        &mut self,
        registry: &mut Registry,
        service: ServiceId,
        bind_addr: &str,
        ports: &str,
    ) -> Result<(), NetError> {
        for port in parse_ports(ports)? {
            let addr = format!("{bind_addr}:{port}");
            let listener = TcpListener::bind(addr.as_str())
                .await
                .map_err(|source| NetError::Bind {
                    addr: addr.clone(),
                    source,
                })?;
            info!(
                service = registry.service(service).name(),
                addr = %addr,
                "listening"
            );
            registry.listener_opened(service);
            self.listeners.push((service, listener));
        }
        Ok(())
    }

    /// 当前全部监听套接字的实际绑定地址（端口 0 绑定后由内核分配）。
    pub fn listener_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|(_, l)| l.local_addr().ok())
            .collect()
    }

    /// 外拨一条连接并把它登记为 `service` 的推送端。
    ///
    /// 解析失败、连接被拒、不可达与超时返回彼此可区分的错误变体；
    /// 成功时若 `spec.settings` 配置了设置字符串则立即发送。
    pub async fn connect(
        &mut self,
        registry: &mut Registry,
        service: ServiceId,
        spec: PusherSpec,
    ) -> Result<ClientId, NetError> {
        self.dial(registry, service, &spec).await
    }

    /// 把一个预先打开的只写接收端挂接为 `service` 的通用客户端。
    ///
    /// 该连接从不被读取；写失败即拆除。
    pub fn attach(
        &self,
        registry: &mut Registry,
        service: ServiceId,
        sink: Box<dyn Write + Send>,
    ) -> ClientId {
        registry.insert_client(service, ClientConn::Sink(sink), ClientRole::Generic, "generic".into())
    }

    /// 向已建立的连接发送设置字符串（每个标志字符一帧命令）。
    pub fn send_settings(&self, registry: &mut Registry, id: ClientId, flags: &str) {
        let wire = encode_settings(flags);
        let Some(client) = registry.client_mut(id) else {
            return;
        };
        match client.write_all(&wire) {
            Ok(()) => debug!(client = %id, flags, "peer settings sent"),
            Err(reason) => registry.remove_client(id, reason),
        }
    }

    /// 轮询全部监听套接字，接纳当前已就绪的连接。
    pub(crate) fn poll_accepts(&mut self, registry: &mut Registry) {
        for (service, listener) in &self.listeners {
            loop {
                match listener.accept().now_or_never() {
                    Some(Ok((stream, peer))) => {
                        configure_socket(&stream);
                        registry.insert_client(
                            *service,
                            ClientConn::Socket(stream),
                            ClientRole::Accepted,
                            peer.to_string(),
                        );
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "accept failed");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    /// 把注册表里的外拨孤儿转入重试队列；未配置重试间隔则丢弃。
    pub(crate) fn adopt_orphans(&mut self, registry: &mut Registry, now: Instant) {
        let orphans = registry.drain_orphaned_pushers();
        let Some(interval) = self.config.reconnect_interval else {
            return;
        };
        for (service, spec) in orphans {
            debug!(
                host = %spec.host,
                port = spec.port,
                delay = ?interval,
                "pusher retry scheduled"
            );
            self.pending.push(PendingDial {
                service,
                spec,
                due: now + interval,
            });
        }
    }

    /// 重试已到期的外拨连接；失败的按重试间隔重新排队。
    pub(crate) async fn retry_pushers(&mut self, registry: &mut Registry, now: Instant) {
        if self.pending.is_empty() {
            return;
        }
        let (due, later): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|dial| dial.due <= now);
        self.pending = later;

        for dial in due {
            match self.dial(registry, dial.service, &dial.spec).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "pusher reconnect failed");
                    if let Some(interval) = self.config.reconnect_interval {
                        self.pending.push(PendingDial {
                            service: dial.service,
                            spec: dial.spec,
                            due: now + interval,
                        });
                    }
                }
            }
        }
    }

    async fn dial(
        &self,
        registry: &mut Registry,
        service: ServiceId,
        spec: &PusherSpec,
    ) -> Result<ClientId, NetError> {
        let target = format!("{}:{}", spec.host, spec.port);
        let mut addrs = lookup_host(target.as_str())
            .await
            .map_err(|source| NetError::Resolve {
                host: spec.host.clone(),
                source,
            })?;
        let Some(addr) = addrs.next() else {
            return Err(NetError::Resolve {
                host: spec.host.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "name resolved to no addresses"),
            });
        };
        drop(addrs);

        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(classify_connect_error(&target, err)),
            Err(_) => {
                return Err(NetError::ConnectTimeout {
                    addr: target,
                    timeout: self.config.connect_timeout,
                });
            }
        };
        configure_socket(&stream);
        info!(
            service = registry.service(service).name(),
            peer = %target,
            "connected"
        );

        let id = registry.insert_client(
            service,
            ClientConn::Socket(stream),
            ClientRole::Pusher(spec.clone()),
            target,
        );
        if let Some(flags) = spec.settings.clone() {
            self.send_settings(registry, id, &flags);
        }
        Ok(id)
    }
}

/// 新建套接字的统一配置：保活开、Nagle 关。失败只记日志，不影响连接。
fn configure_socket(stream: &TcpStream) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "set_nodelay failed");
    }
    if let Err(err) = SockRef::from(stream).set_keepalive(true) {
        debug!(error = %err, "set_keepalive failed");
    }
}

fn parse_ports(spec: &str) -> Result<Vec<u16>, NetError> {
    spec.split(',')
        .map(|part| {
            part.trim().parse::<u16>().map_err(|_| NetError::PortSpec {
                spec: spec.to_owned(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReadMode;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn setup() -> (Registry, ConnectionManager) {
        let config = Arc::new(NetConfig::default());
        (Registry::new(config.clone()), ConnectionManager::new(config))
    }

    /// 逗号分隔端口表逐项解析；非法项整体报错。
    #[test]
    fn port_spec_parsing() {
        assert_eq!(parse_ports("30005").unwrap(), vec![30005]);
        assert_eq!(parse_ports("30005, 30104").unwrap(), vec![30005, 30104]);
        assert!(matches!(
            parse_ports("30005,oops"),
            Err(NetError::PortSpec { .. })
        ));
    }

    /// 监听后被 accept 的连接成为该服务的客户端并计入连接数。
    #[tokio::test]
    async fn accepted_connections_join_the_service() {
        let (mut registry, mut manager) = setup();
        let svc = registry.add_service("in", ReadMode::Beast, None);

        manager
            .listen(&mut registry, svc, "127.0.0.1", "0,0")
            .await
            .unwrap();
        assert_eq!(registry.service(svc).listener_count(), 2);

        let addr = manager.listener_addrs()[0];
        let _peer = TcpStream::connect(addr).await.unwrap();

        // 就绪可能晚于 connect 返回一两个轮询周期。
        for _ in 0..50 {
            manager.poll_accepts(&mut registry);
            if registry.connection_count(svc) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.connection_count(svc), 1);
    }

    /// 外拨成功后立即把设置字符串编码为命令帧发给对端。
    #[tokio::test]
    async fn connect_sends_settings_frames() {
        let (mut registry, mut manager) = setup();
        let svc = registry.add_service("in", ReadMode::Beast, None);

        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = upstream.local_addr().unwrap();

        let id = manager
            .connect(
                &mut registry,
                svc,
                PusherSpec {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    settings: Some("Cdfj".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(registry.service(svc).pusher_count(), 1);
        assert!(registry.client(id).is_some());

        let (mut accepted, _) = upstream.accept().await.unwrap();
        let mut wire = vec![0u8; 12];
        accepted.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, encode_settings("Cdfj"));
    }

    /// 连接被拒与解析失败返回可区分的错误变体，且不登记任何客户端。
    #[tokio::test]
    async fn failed_connect_yields_descriptive_errors() {
        let (mut registry, mut manager) = setup();
        let svc = registry.add_service("in", ReadMode::Beast, None);

        // 先绑定再释放，取得一个当前无人监听的端口。
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let refused = manager
            .connect(
                &mut registry,
                svc,
                PusherSpec {
                    host: addr.ip().to_string(),
                    port: addr.port(),
                    settings: None,
                },
            )
            .await;
        assert!(matches!(refused, Err(NetError::Refused { .. })));

        let unresolved = manager
            .connect(
                &mut registry,
                svc,
                PusherSpec {
                    host: "256.256.256.256".into(),
                    port: 1,
                    settings: None,
                },
            )
            .await;
        assert!(matches!(unresolved, Err(NetError::Resolve { .. })));

        assert_eq!(registry.connection_count(svc), 0);
    }

    /// 孤儿外拨按重试间隔排队，到期后重拨成功并重发设置。
    #[tokio::test]
    async fn orphaned_pusher_is_retried_after_interval() {
        let config = Arc::new(NetConfig {
            reconnect_interval: Some(Duration::from_millis(50)),
            ..NetConfig::default()
        });
        let mut registry = Registry::new(config.clone());
        let mut manager = ConnectionManager::new(config);
        let svc = registry.add_service("in", ReadMode::Beast, None);

        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = upstream.local_addr().unwrap();
        let spec = PusherSpec {
            host: addr.ip().to_string(),
            port: addr.port(),
            settings: None,
        };

        let id = manager
            .connect(&mut registry, svc, spec)
            .await
            .unwrap();
        registry.remove_client(id, crate::client::CloseReason::Eof);

        let now = Instant::now();
        manager.adopt_orphans(&mut registry, now);

        // 间隔未到：不重拨。
        manager.retry_pushers(&mut registry, now).await;
        assert_eq!(registry.connection_count(svc), 0);

        manager
            .retry_pushers(&mut registry, now + Duration::from_millis(60))
            .await;
        assert_eq!(registry.connection_count(svc), 1);
        assert_eq!(registry.service(svc).pusher_count(), 1);
    }
}
