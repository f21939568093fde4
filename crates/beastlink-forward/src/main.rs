//! `beastlink-forward`：瞬态桥接进程。
//!
//! 外拨一个 Beast 格式的遥测源（默认 `127.0.0.1:30005`），把每帧渲染
//! 成一行文本记录写到标准输出。输入或输出任一侧断开即退出——它是一座
//! 桥，不是常驻服务器。启动期连不上遥测源以非零状态码退出。

mod relay;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use beastlink_net::{
    ConnectionManager, ExitPolicy, HeartbeatPolicy, NetConfig, OutputBuffer, PusherSpec, ReadMode,
    Registry, Scheduler, ShutdownFlag,
};
use relay::RelayPipeline;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 30005;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // 记录流占用标准输出，日志一律走标准错误。
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let port = match args.next() {
        None => DEFAULT_PORT,
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                error!(argument = %raw, "port argument is not a valid TCP port");
                return ExitCode::from(2);
            }
        },
    };

    let config = Arc::new(NetConfig {
        // 桥接形态不重连：断开由退出策略处理。
        reconnect_interval: None,
        ..NetConfig::default()
    });
    let shutdown = ShutdownFlag::new();
    spawn_signal_watch(shutdown.clone());

    let mut registry = Registry::new(config.clone());
    let mut manager = ConnectionManager::new(config.clone());

    let input = registry.add_service("beast input", ReadMode::Beast, None);
    let output = registry.add_service(
        "record output",
        ReadMode::Ignore,
        Some(OutputBuffer::new(
            config.out_buf_capacity,
            HeartbeatPolicy::None,
            Instant::now(),
        )),
    );

    // 对端设置：二进制格式开、过滤关、CRC 校验开、Mode-A/C 关。
    let spec = PusherSpec {
        host: host.clone(),
        port,
        settings: Some("Cdfj".to_owned()),
    };
    if let Err(err) = manager.connect(&mut registry, input, spec).await {
        error!(
            host = %host,
            port,
            error = %err,
            "failed to connect to the telemetry source (is the receiver running?)"
        );
        return ExitCode::FAILURE;
    }
    manager.attach(&mut registry, output, Box::new(io::stdout()));

    let mut scheduler = Scheduler::new(
        registry,
        manager,
        RelayPipeline::new(),
        config,
        shutdown,
        ExitPolicy::RequireConnections(vec![input, output]),
    );
    scheduler.run().await;

    info!(
        relayed = scheduler.pipeline().relayed(),
        "bridge finished"
    );
    ExitCode::SUCCESS
}

/// 把 SIGINT/SIGTERM 翻译成停机标志；循环在当前趟结束后干净退出。
fn spawn_signal_watch(shutdown: ShutdownFlag) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        shutdown.request();
    });
}
