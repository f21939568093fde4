//! 网络层错误域与 IO 错误归类。

use std::io;
use std::time::Duration;

use thiserror::Error;

/// 网络服务层对外暴露的错误域。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 把“地址解析失败 / 连接被拒 / 主机不可达 / 建连超时”区分为独立变体，
///   使调用方（以及日志读者）无需翻查底层 `io::Error` 即可判断故障性质；
/// - 启动期创建监听或外拨服务失败属于进程级致命错误，由二进制入口转换为
///   非零退出码；其余错误只影响单条连接，在一趟调度内就地消化。
///
/// ## 契约 (What)
/// - 所有变体实现 `std::error::Error` 并携带可读上下文（地址、端口表等）；
/// - `Resolve`/`Refused`/`Unreachable`/`ConnectTimeout` 仅出现在外拨路径，
///   `Bind`/`PortSpec` 仅出现在监听路径。
#[derive(Debug, Error)]
pub enum NetError {
    /// 目标主机名无法解析出任何地址。
    #[error("failed to resolve `{host}`: {source}")]
    Resolve {
        /// 待解析的主机名。
        host: String,
        /// 底层解析错误。
        #[source]
        source: io::Error,
    },

    /// 对端明确拒绝了连接（目标可达但无人监听）。
    #[error("connection to {addr} refused: {source}")]
    Refused {
        /// 目标地址。
        addr: String,
        /// 底层 IO 错误。
        #[source]
        source: io::Error,
    },

    /// 目标主机或网络不可达。
    #[error("{addr} is unreachable: {source}")]
    Unreachable {
        /// 目标地址。
        addr: String,
        /// 底层 IO 错误。
        #[source]
        source: io::Error,
    },

    /// 建连在限定时长内未完成。
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// 目标地址。
        addr: String,
        /// 生效的超时配置。
        timeout: Duration,
    },

    /// 建连失败且不属于以上任何一类。
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// 目标地址。
        addr: String,
        /// 底层 IO 错误。
        #[source]
        source: io::Error,
    },

    /// 监听套接字绑定失败。
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// 绑定地址（含端口）。
        addr: String,
        /// 底层 IO 错误。
        #[source]
        source: io::Error,
    },

    /// 逗号分隔端口表中存在无法解析的项。
    #[error("invalid port in `{spec}`")]
    PortSpec {
        /// 原始端口表文本。
        spec: String,
    },
}

/// 将外拨建连的 IO 错误归类为稳定的 [`NetError`] 变体。
pub(crate) fn classify_connect_error(addr: &str, error: io::Error) -> NetError {
    use io::ErrorKind;
    let addr = addr.to_owned();
    match error.kind() {
        ErrorKind::ConnectionRefused => NetError::Refused {
            addr,
            source: error,
        },
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => NetError::Unreachable {
            addr,
            source: error,
        },
        _ => NetError::Connect {
            addr,
            source: error,
        },
    }
}
