//! 单条连接的记录：传输载体、角色与定容读缓冲。

use std::fmt;
use std::io::{self, Write};

use tokio::net::TcpStream;

use crate::service::ServiceId;

/// 连接的进程内唯一标识，注册表以它为键存放客户端记录。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 外拨连接的拨号参数：断线重试与重发设置字符串都依赖它。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PusherSpec {
    /// 目标主机名或地址。
    pub host: String,
    /// 目标端口。
    pub port: u16,
    /// 建连成功后立即发送的设置字符串（每个字符一帧命令）。
    pub settings: Option<String>,
}

/// 连接的角色：监听派生、外拨、或包装预先打开的只写描述符。
#[derive(Debug)]
pub enum ClientRole {
    /// 监听套接字 accept 出来的连接。
    Accepted,
    /// 本进程主动外拨并负责重试的连接。
    Pusher(PusherSpec),
    /// 包装一个预先打开的只写接收端（例如标准输出），从不读取。
    Generic,
}

/// 连接的传输载体。
pub enum ClientConn {
    /// 非阻塞 TCP 套接字，读写都经由 `try_read`/`try_write`。
    Socket(TcpStream),
    /// 任意只写接收端；写入是同步的（标准输出即属此类）。
    Sink(Box<dyn Write + Send>),
}

impl fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(_) => f.write_str("Socket"),
            Self::Sink(_) => f.write_str("Sink"),
        }
    }
}

/// 连接被拆除的原因，仅用于日志与重试决策。
#[derive(Debug)]
pub enum CloseReason {
    /// 对端正常关闭。
    Eof,
    /// 读取失败。
    Read(io::Error),
    /// 写入失败。
    Write(io::Error),
    /// 非阻塞写无法一次送完整个刷写快照（消费过慢）。
    SlowConsumer,
    /// 协议错误：读缓冲写满仍解不出任何完整单元。
    Protocol(&'static str),
}

/// 一条活动连接：所属服务、传输载体、角色与定容读缓冲。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 读缓冲容量固定：到达边界任意的字节流先落在这里，由解码器切出完整
///   单元；缓冲写满而无法前进说明流已不可恢复，连接应当拆除；
/// - 对服务的引用是 id 回指而非所有权，注册表才是唯一属主，拆除时不
///   存在悬垂指针问题。
///
/// ## 契约 (What)
/// - **不变式**：`buffered <= buf.len()`；
/// - 读写都不阻塞：`try_fill` 在内核无数据时返回 `WouldBlock`，
///   `write_all` 在内核缓冲吃不下快照时报告 `SlowConsumer`；
/// - `Generic` 角色的连接从不被读取（所属服务读取模式为 Ignore）。
#[derive(Debug)]
pub struct Client {
    id: ClientId,
    service: ServiceId,
    conn: ClientConn,
    role: ClientRole,
    peer: String,
    buf: Box<[u8]>,
    buffered: usize,
    /// 该连接是否额外要求转发传统 Mode-A/C 帧（由命令帧 `'J'`/`'j'` 翻转）。
    pub wants_modeac: bool,
}

/// 一次非阻塞读取的结果。
pub(crate) enum ReadOutcome {
    /// 读到了 `n` 字节。
    Data(usize),
    /// 内核暂无数据。
    WouldBlock,
    /// 对端关闭。
    Eof,
    /// 读取出错。
    Failed(io::Error),
}

impl Client {
    pub(crate) fn new(
        id: ClientId,
        service: ServiceId,
        conn: ClientConn,
        role: ClientRole,
        peer: String,
        buf_size: usize,
    ) -> Self {
        Self {
            id,
            service,
            conn,
            role,
            peer,
            buf: vec![0u8; buf_size].into_boxed_slice(),
            buffered: 0,
            wants_modeac: false,
        }
    }

    /// 连接标识。
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// 所属服务。
    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// 角色。
    pub fn role(&self) -> &ClientRole {
        &self.role
    }

    pub(crate) fn into_role(self) -> ClientRole {
        self.role
    }

    /// 对端标签（地址或 `"generic"`），仅用于日志。
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 当前缓冲的字节视图。
    pub(crate) fn buffered_bytes(&self) -> &[u8] {
        &self.buf[..self.buffered]
    }

    /// 读缓冲是否已满。
    pub(crate) fn buffer_full(&self) -> bool {
        self.buffered == self.buf.len()
    }

    /// 只有套接字连接可读；`Generic` 永不读取。
    pub(crate) fn is_readable(&self) -> bool {
        matches!(self.conn, ClientConn::Socket(_)) && !matches!(self.role, ClientRole::Generic)
    }

    /// 非阻塞地把内核数据追加进读缓冲。
    pub(crate) fn try_fill(&mut self) -> ReadOutcome {
        let ClientConn::Socket(stream) = &self.conn else {
            return ReadOutcome::WouldBlock;
        };
        if self.buffered == self.buf.len() {
            return ReadOutcome::WouldBlock;
        }
        match stream.try_read(&mut self.buf[self.buffered..]) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => {
                self.buffered += n;
                ReadOutcome::Data(n)
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(err) => ReadOutcome::Failed(err),
        }
    }

    /// 丢弃缓冲头部的 `n` 个已消费字节，尾部前移。
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buffered);
        self.buf.copy_within(n..self.buffered, 0);
        self.buffered -= n;
    }

    /// 把整个切片写给对端；任何无法立即完成的情况都视为连接失败。
    pub(crate) fn write_all(&mut self, bytes: &[u8]) -> Result<(), CloseReason> {
        match &mut self.conn {
            ClientConn::Socket(stream) => {
                let mut offset = 0;
                while offset < bytes.len() {
                    match stream.try_write(&bytes[offset..]) {
                        Ok(0) => {
                            return Err(CloseReason::Write(io::Error::from(
                                io::ErrorKind::WriteZero,
                            )));
                        }
                        Ok(n) => offset += n,
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                            // 内核发送缓冲吃不下剩余字节：不排队、不阻塞，
                            // 按慢消费者拆除。
                            return Err(CloseReason::SlowConsumer);
                        }
                        Err(err) => return Err(CloseReason::Write(err)),
                    }
                }
                Ok(())
            }
            ClientConn::Sink(sink) => sink
                .write_all(bytes)
                .and_then(|()| sink.flush())
                .map_err(CloseReason::Write),
        }
    }
}
