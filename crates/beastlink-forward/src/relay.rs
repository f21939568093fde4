//! 透传流水线：不做任何位级解码，把每个遥测帧渲染成一行制表符
//! 分隔的文本记录（类型、MLAT 计数、信号强度、十六进制载荷）。
//! 真正的报文解码器通过同一个 [`MessagePipeline`] 接缝接入。

use std::time::{Duration, Instant};

use tracing::debug;

use beastlink_net::{FrameInput, MessagePipeline};

const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// 一条待输出的记录。
pub struct RelayRecord {
    kind: &'static str,
    mlat: u64,
    signal: u8,
    payload_hex: String,
}

/// 透传形态的流水线实现。
pub struct RelayPipeline {
    crc_checking: bool,
    relayed: u64,
    last_report: Option<Instant>,
}

impl RelayPipeline {
    /// 构造流水线；CRC 校验开关的初值与发给对端的设置字符串一致。
    pub fn new() -> Self {
        Self {
            crc_checking: true,
            relayed: 0,
            last_report: None,
        }
    }

    /// 已转发的帧数。
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    /// 当前 CRC 校验开关。
    pub fn crc_checking(&self) -> bool {
        self.crc_checking
    }
}

impl Default for RelayPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePipeline for RelayPipeline {
    type Message = RelayRecord;

    fn decode(&mut self, input: FrameInput<'_>) -> Option<RelayRecord> {
        match input {
            FrameInput::Binary(frame) => {
                let mut mlat = 0u64;
                for &byte in &frame.mlat {
                    mlat = (mlat << 8) | u64::from(byte);
                }
                Some(RelayRecord {
                    kind: frame.kind.label(),
                    mlat,
                    signal: frame.signal,
                    payload_hex: hex::encode(&frame.payload),
                })
            }
            // 桥接形态的输入侧只讲二进制协议。
            FrameInput::Line(_) => None,
        }
    }

    fn track(&mut self, _message: &RelayRecord) {
        self.relayed += 1;
    }

    fn render(&mut self, message: &RelayRecord) -> Option<Vec<u8>> {
        Some(
            format!(
                "{}\t{}\t{}\t{}\n",
                message.kind, message.mlat, message.signal, message.payload_hex
            )
            .into_bytes(),
        )
    }

    fn periodic(&mut self, now: Instant) {
        match self.last_report {
            None => self.last_report = Some(now),
            Some(last) if now.duration_since(last) >= REPORT_INTERVAL => {
                debug!(relayed = self.relayed, "relay statistics");
                self.last_report = Some(now);
            }
            Some(_) => {}
        }
    }

    fn handle_option(&mut self, option: u8) {
        match option {
            b'C' => self.crc_checking = true,
            b'c' => self.crc_checking = false,
            other => debug!(option = other, "ignoring unsupported peer option"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beastlink_net::{BeastFrame, FrameKind};

    /// 帧被渲染为一行制表符分隔的记录，MLAT 按大端聚合。
    #[test]
    fn frame_renders_as_tab_separated_record() {
        let mut pipeline = RelayPipeline::new();
        let frame = BeastFrame {
            kind: FrameKind::ModeSShort,
            mlat: [0, 0, 0, 0, 1, 0],
            signal: 0x40,
            payload: vec![0x5D, 0x3C, 0x66, 0x57, 0xA0, 0x5F, 0x1C],
        };

        let message = pipeline.decode(FrameInput::Binary(&frame)).unwrap();
        pipeline.track(&message);
        let record = pipeline.render(&message).unwrap();

        assert_eq!(
            String::from_utf8(record).unwrap(),
            "mode_s_short\t256\t64\t5d3c6657a05f1c\n"
        );
        assert_eq!(pipeline.relayed(), 1);
    }

    /// 对端 CRC 选项翻转开关，未知选项不改变状态。
    #[test]
    fn crc_option_toggles_state() {
        let mut pipeline = RelayPipeline::new();
        assert!(pipeline.crc_checking());
        pipeline.handle_option(b'c');
        assert!(!pipeline.crc_checking());
        pipeline.handle_option(b'C');
        assert!(pipeline.crc_checking());
        pipeline.handle_option(b'd');
        assert!(pipeline.crc_checking());
    }
}
