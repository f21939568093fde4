#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `beastlink-net` 把若干条角色各异的 TCP 连接（监听口 accept 的、
//! 主动外拨的、包装预先打开描述符的）复用成若干命名“服务”，同一服务
//! 的连接共享一种读取模式与一个带缓冲的输出写端。
//!
//! # 模块定位（Why）
//! - 核心问题：从一侧收取分帧的二进制遥测，经外部流水线转换后，把输出
//!   扇出给任意数量的下游连接——全程不阻塞进程，且在连接增删与不完整
//!   读写之间不丢数据；
//! - 一个非阻塞循环里要同时调和三件事：字节流重组（隐式定长的二进制帧
//!   与换行分隔的 ASCII 记录两种形态）、跨连接共享的按尺寸/时间双水位
//!   刷写的输出缓冲、以及与例行维护共存的连接生命周期管理。
//!
//! # 结构概览（How）
//! - [`codec`]：两种读取模式的增量分帧解码与线路编码；
//! - [`buffer`]：服务级共享输出缓冲与空闲心跳策略；
//! - [`client`] / [`service`]：连接记录与服务注册表（索引稳定的属主
//!   集合，替代侵入式链表）；
//! - [`manager`]：监听、外拨（带重试）、裸描述符挂接与连接拆除；
//! - [`scheduler`]：单线程协作式循环，驱动读取、维护、刷写与重连；
//! - [`pipeline`]：对外部报文流水线（位级解码、航迹、报告渲染）的窄
//!   接口，本层不含任何位级协议知识。
//!
//! # 并发契约（What）
//! - 单线程、协作式、非阻塞：所有共享状态只被调度器的单一控制流触碰，
//!   不需要任何锁；
//! - 停机由显式标志表达，信号处理置位，循环每趟检查一次。

pub mod buffer;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod test_util;

pub use buffer::{HeartbeatPolicy, OutputBuffer};
pub use client::{Client, ClientConn, ClientId, ClientRole, CloseReason, PusherSpec};
pub use codec::{BeastFrame, Decoded, FrameKind, ReadMode, encode_frame, encode_settings};
pub use config::NetConfig;
pub use error::NetError;
pub use manager::ConnectionManager;
pub use pipeline::{FrameInput, MessagePipeline};
pub use scheduler::{ExitPolicy, Scheduler, ShutdownFlag};
pub use service::{NetService, Registry, ServiceId};
