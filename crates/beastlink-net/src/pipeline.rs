//! 通往外部报文流水线的窄接口。

use std::time::Instant;

use crate::codec::BeastFrame;

/// 解码器交给外部流水线的一个输入单元：二进制帧或 ASCII 记录。
#[derive(Debug)]
pub enum FrameInput<'a> {
    /// 二进制遥测帧（去转义后）。
    Binary(&'a BeastFrame),
    /// 一条 ASCII 记录（不含分隔符）。
    Line(&'a [u8]),
}

/// 外部报文流水线的窄接口。
///
/// # 教案式说明
///
/// ## 意图 (Why)
/// - 位级解码、CRC 纠错、航迹维护、文本报告生成都不属于网络层；本层
///   只通过这一组最小方法调用它们，保持两侧可以独立演进与测试；
/// - 解码产出的报文只在单次分发调用期间被网络层借用，之后所有权关系
///   与本层无关。
///
/// ## 契约 (What)
/// - `decode`：把一个输入单元解成报文；解不出（畸形、CRC 拒绝、被过滤）
///   返回 `None`——这是常态而非连接故障，绝不触发连接拆除；
/// - `track`：用报文更新航迹状态；
/// - `render`：把报文渲染成一条输出记录的字节；`None` 表示该报文不产生
///   输出；
/// - `periodic`：每趟调度调用一次的例行维护（航迹老化、过滤表过期）；
/// - `handle_option`：处理对端命令帧里网络层不认识的配置选项（例如
///   CRC 校验开关）。与连接绑定的选项（Mode-A/C 开关）由网络层就地
///   处理，不会到达这里。
pub trait MessagePipeline {
    /// 解码产出的报文类型，对网络层完全不透明。
    type Message;

    /// 把一个输入单元解成报文，失败返回 `None`。
    fn decode(&mut self, input: FrameInput<'_>) -> Option<Self::Message>;

    /// 用报文更新航迹状态。
    fn track(&mut self, message: &Self::Message);

    /// 把报文渲染成一条输出记录。
    fn render(&mut self, message: &Self::Message) -> Option<Vec<u8>>;

    /// 例行维护钩子，每趟调度调用一次。
    fn periodic(&mut self, now: Instant);

    /// 处理一个对端配置选项字节。默认忽略。
    fn handle_option(&mut self, option: u8) {
        let _ = option;
    }
}
