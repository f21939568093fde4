//! Beast 二进制分帧与 ASCII 行分帧的增量解码器。
//!
//! # 模块定位（Why）
//! - 每条连接的字节流到达边界是任意的，解码必须以“已缓冲字节”为输入做
//!   增量状态机：凑不齐的尾部留在缓冲里，等下一次读取补齐；
//! - 二进制协议以 `0x1A` 作为帧起始标记，数据体里出现的 `0x1A` 由发送端
//!   加倍转义，解码时折叠回单字节；
//! - 命令子模式复用同一套标记扫描，但载荷被解释为对端配置命令，不进入
//!   报文流水线。
//!
//! # 行为概览（How）
//! - `decode_stream` 返回“已消费字节数”，调用方据此前移读缓冲；
//! - 标记之前的杂音字节直接丢弃（重新同步）；标记后出现未知类型字节时
//!   跳过该标记继续扫描；帧体内部出现未转义的标记时，当前半帧作废并从
//!   该标记重新开始——这三条规则共同保证流失步后能在有限字节内恢复；
//! - 行模式按配置的分隔符切分，记录尾部的 `\r` 会被剥除。

/// 帧起始标记，同时也是转义字节：数据体中的 `0x1A` 在线路上成对出现。
pub const MARKER: u8 = 0x1A;

/// 空闲输出连接上注入的保活载荷：一个全零的 Mode-A/C 帧。
pub const BEAST_KEEPALIVE: [u8; 11] = [MARKER, b'1', 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// 遥测帧体在载荷之前的固定前导：6 字节 MLAT 计数器 + 1 字节信号强度。
const PREAMBLE_LEN: usize = 7;

/// 遥测帧的三种类型，类型字节决定载荷长度。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// `'1'`：Mode-A/C，2 字节载荷。
    ModeAc,
    /// `'2'`：Mode-S 短帧，7 字节载荷。
    ModeSShort,
    /// `'3'`：Mode-S 长帧，14 字节载荷。
    ModeSLong,
}

impl FrameKind {
    /// 从线路类型字节识别帧类型；未知字节返回 `None`，触发重新同步。
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            b'1' => Some(Self::ModeAc),
            b'2' => Some(Self::ModeSShort),
            b'3' => Some(Self::ModeSLong),
            _ => None,
        }
    }

    /// 该类型在线路上使用的类型字节。
    pub fn type_byte(self) -> u8 {
        match self {
            Self::ModeAc => b'1',
            Self::ModeSShort => b'2',
            Self::ModeSLong => b'3',
        }
    }

    /// 该类型的载荷长度（转义折叠之后）。
    pub fn payload_len(self) -> usize {
        match self {
            Self::ModeAc => 2,
            Self::ModeSShort => 7,
            Self::ModeSLong => 14,
        }
    }

    /// 面向日志与文本记录的类型标签。
    pub fn label(self) -> &'static str {
        match self {
            Self::ModeAc => "mode_ac",
            Self::ModeSShort => "mode_s_short",
            Self::ModeSLong => "mode_s_long",
        }
    }
}

/// 一个完整的遥测帧：类型 + 去转义后的前导与载荷。
///
/// 网络层只负责把它原样交给外部报文流水线，不做任何位级解读。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeastFrame {
    /// 帧类型。
    pub kind: FrameKind,
    /// 6 字节 MLAT 计数器（大端，按线路原样保留）。
    pub mlat: [u8; 6],
    /// 信号强度字节。
    pub signal: u8,
    /// 去转义后的报文载荷，长度由 [`FrameKind::payload_len`] 决定。
    pub payload: Vec<u8>,
}

/// 服务的读取模式：同一服务的所有连接共享一种模式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// 从不读取（纯输出连接）。
    Ignore,
    /// Beast 二进制遥测帧。
    Beast,
    /// Beast 命令帧：载荷解释为配置命令，不进入报文流水线。
    BeastCommand,
    /// 按分隔符切分的 ASCII 记录。
    AsciiLine {
        /// 记录分隔符（通常是 `b'\n'`）。
        sep: u8,
    },
}

/// 解码器产出的一个完整协议单元。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// 一个完整的二进制遥测帧。
    Frame(BeastFrame),
    /// 一条完整的 ASCII 记录（不含分隔符，尾部 `\r` 已剥除）。
    Record(Vec<u8>),
    /// 一个命令帧携带的配置选项字节。
    Command(u8),
}

/// 单次帧解析的结果：完整单元、需要更多字节、或跳过若干字节重新同步。
enum Step {
    Done(Decoded, usize),
    Need,
    Skip(usize),
}

/// 在 `buf` 上按 `mode` 尽可能多地解出完整单元，返回已消费的字节数。
///
/// # 契约说明
/// - **前置条件**：`mode` 不为 [`ReadMode::Ignore`]（该模式下调度器根本
///   不会发起读取）；
/// - **后置条件**：`out` 按到达顺序追加完整单元；返回值之前的字节不再
///   需要保留，之后的字节是某个未完成单元的前缀，必须原样留在缓冲；
/// - 对任意切分方式喂入同一字节流，产出的单元序列与一次性喂入完全一致。
pub fn decode_stream(mode: ReadMode, buf: &[u8], out: &mut Vec<Decoded>) -> usize {
    match mode {
        ReadMode::Ignore => buf.len(),
        ReadMode::Beast => decode_beast(buf, false, out),
        ReadMode::BeastCommand => decode_beast(buf, true, out),
        ReadMode::AsciiLine { sep } => decode_lines(sep, buf, out),
    }
}

fn decode_beast(buf: &[u8], commands: bool, out: &mut Vec<Decoded>) -> usize {
    let mut pos = 0;
    while pos < buf.len() {
        // 标记之前的一切都是杂音，丢弃到下一个标记为止。
        match buf[pos..].iter().position(|&b| b == MARKER) {
            Some(off) => pos += off,
            None => return buf.len(),
        }
        let step = if commands {
            parse_command(&buf[pos..])
        } else {
            parse_frame(&buf[pos..])
        };
        match step {
            Step::Done(unit, len) => {
                out.push(unit);
                pos += len;
            }
            Step::Skip(len) => pos += len,
            Step::Need => return pos,
        }
    }
    buf.len()
}

/// 解析一个以标记打头的遥测帧。`buf[0]` 必须是 [`MARKER`]。
fn parse_frame(buf: &[u8]) -> Step {
    debug_assert_eq!(buf.first(), Some(&MARKER));
    let Some(&type_byte) = buf.get(1) else {
        return Step::Need;
    };
    let Some(kind) = FrameKind::from_type_byte(type_byte) else {
        // 未知类型：这个标记不是帧起始，跳过它继续扫描。
        return Step::Skip(1);
    };

    let body_len = PREAMBLE_LEN + kind.payload_len();
    let mut body = Vec::with_capacity(body_len);
    let mut pos = 2;
    while body.len() < body_len {
        let Some(&byte) = buf.get(pos) else {
            return Step::Need;
        };
        if byte == MARKER {
            match buf.get(pos + 1) {
                // 加倍的标记折叠为一个字面 0x1A。
                Some(&MARKER) => {
                    body.push(MARKER);
                    pos += 2;
                }
                // 帧体内出现未转义的标记：当前半帧作废，从这里重新同步。
                Some(_) => return Step::Skip(pos),
                None => return Step::Need,
            }
        } else {
            body.push(byte);
            pos += 1;
        }
    }

    let mut mlat = [0u8; 6];
    mlat.copy_from_slice(&body[..6]);
    let frame = BeastFrame {
        kind,
        mlat,
        signal: body[6],
        payload: body[PREAMBLE_LEN..].to_vec(),
    };
    Step::Done(Decoded::Frame(frame), pos)
}

/// 解析一个命令帧：`0x1A '1' <option>`，载荷不转义。
fn parse_command(buf: &[u8]) -> Step {
    debug_assert_eq!(buf.first(), Some(&MARKER));
    let Some(&type_byte) = buf.get(1) else {
        return Step::Need;
    };
    if type_byte != b'1' {
        return Step::Skip(1);
    }
    match buf.get(2) {
        Some(&option) => Step::Done(Decoded::Command(option), 3),
        None => Step::Need,
    }
}

fn decode_lines(sep: u8, buf: &[u8], out: &mut Vec<Decoded>) -> usize {
    let mut pos = 0;
    while let Some(off) = buf[pos..].iter().position(|&b| b == sep) {
        let mut record = buf[pos..pos + off].to_vec();
        if record.last() == Some(&b'\r') {
            record.pop();
        }
        out.push(Decoded::Record(record));
        pos += off + 1;
    }
    pos
}

/// 将一个遥测帧编码回线路格式：标记、类型字节、逐字节转义的帧体。
pub fn encode_frame(frame: &BeastFrame) -> Vec<u8> {
    let mut wire = Vec::with_capacity(2 + 2 * (PREAMBLE_LEN + frame.payload.len()));
    wire.push(MARKER);
    wire.push(frame.kind.type_byte());
    let body = frame
        .mlat
        .iter()
        .chain(std::iter::once(&frame.signal))
        .chain(frame.payload.iter());
    for &byte in body {
        wire.push(byte);
        if byte == MARKER {
            wire.push(MARKER);
        }
    }
    wire
}

/// 将设置字符串编码为一串命令帧：每个标志字符一帧 `0x1A '1' <ch>`。
///
/// 外拨连接建立后立即发送一次，用于配置对端的分帧模式与过滤行为
/// （例如 `"Cdfj"`：二进制格式开、过滤关、CRC 校验开、Mode-A/C 关）。
pub fn encode_settings(flags: &str) -> Vec<u8> {
    let mut wire = Vec::with_capacity(flags.len() * 3);
    for ch in flags.bytes() {
        wire.extend_from_slice(&[MARKER, b'1', ch]);
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frame(kind: FrameKind, fill: u8) -> BeastFrame {
        BeastFrame {
            kind,
            mlat: [fill; 6],
            signal: fill,
            payload: vec![fill; kind.payload_len()],
        }
    }

    /// 模拟一条连接的读缓冲：任意切分喂入字节，增量解码。
    struct Reassembler {
        buf: Vec<u8>,
        units: Vec<Decoded>,
    }

    impl Reassembler {
        fn new() -> Self {
            Self {
                buf: Vec::new(),
                units: Vec::new(),
            }
        }

        fn feed(&mut self, mode: ReadMode, chunk: &[u8]) {
            self.buf.extend_from_slice(chunk);
            let consumed = decode_stream(mode, &self.buf, &mut self.units);
            self.buf.drain(..consumed);
        }
    }

    /// 两个完整帧中间夹一个加倍标记，必须在帧边界处确定性切分并折叠转义。
    #[test]
    fn doubled_marker_inside_body_collapses_to_one() {
        let mut first = frame(FrameKind::ModeAc, 0x01);
        first.payload = vec![MARKER, 0x02];
        let second = frame(FrameKind::ModeAc, 0x04);

        let mut wire = encode_frame(&first);
        // 线路上应能看到成对的标记。
        assert!(wire.windows(2).any(|w| w[0] == MARKER && w[1] == MARKER));
        wire.extend_from_slice(&encode_frame(&second));

        let mut units = Vec::new();
        let consumed = decode_stream(ReadMode::Beast, &wire, &mut units);
        assert_eq!(consumed, wire.len());
        assert_eq!(
            units,
            vec![Decoded::Frame(first), Decoded::Frame(second)]
        );
    }

    /// 标记前的杂音与未知类型字节都不能阻塞后续帧的识别。
    #[test]
    fn resyncs_past_junk_and_unknown_types() {
        let good = frame(FrameKind::ModeSShort, 0x33);
        let mut wire = vec![0xAA, 0xBB, MARKER, b'9'];
        wire.extend_from_slice(&encode_frame(&good));

        let mut units = Vec::new();
        let consumed = decode_stream(ReadMode::Beast, &wire, &mut units);
        assert_eq!(consumed, wire.len());
        assert_eq!(units, vec![Decoded::Frame(good)]);
    }

    /// 帧体内出现未转义的标记时，半帧作废，新帧从该标记重新开始。
    #[test]
    fn unescaped_marker_mid_body_restarts_frame() {
        let good = frame(FrameKind::ModeAc, 0x05);
        // 一个 Mode-S 长帧的开头，但 3 字节后被新帧打断。
        let mut wire = vec![MARKER, b'3', 0x10, 0x11, 0x12];
        wire.extend_from_slice(&encode_frame(&good));

        let mut units = Vec::new();
        let consumed = decode_stream(ReadMode::Beast, &wire, &mut units);
        assert_eq!(consumed, wire.len());
        assert_eq!(units, vec![Decoded::Frame(good)]);
    }

    /// 凑不齐的尾部必须原样保留：先喂一半，再喂另一半，产出同一个帧。
    #[test]
    fn partial_frame_stays_buffered_until_completed() {
        let full = frame(FrameKind::ModeSLong, 0x42);
        let wire = encode_frame(&full);
        let (head, tail) = wire.split_at(5);

        let mut asm = Reassembler::new();
        asm.feed(ReadMode::Beast, head);
        assert!(asm.units.is_empty());
        assert_eq!(asm.buf.len(), head.len());

        asm.feed(ReadMode::Beast, tail);
        assert_eq!(asm.units, vec![Decoded::Frame(full)]);
        assert!(asm.buf.is_empty());
    }

    /// 行模式：`"REC1\nREC2\nREC"` 产出两条记录，`REC` 留在缓冲里。
    #[test]
    fn line_mode_keeps_trailing_partial_record() {
        let mut asm = Reassembler::new();
        asm.feed(ReadMode::AsciiLine { sep: b'\n' }, b"REC1\nREC2\nREC");
        assert_eq!(
            asm.units,
            vec![
                Decoded::Record(b"REC1".to_vec()),
                Decoded::Record(b"REC2".to_vec()),
            ]
        );
        assert_eq!(asm.buf, b"REC");

        asm.feed(ReadMode::AsciiLine { sep: b'\n' }, b"3\r\n");
        assert_eq!(asm.units.last(), Some(&Decoded::Record(b"REC3".to_vec())));
    }

    /// 命令模式：合法命令帧产出选项字节，其他类型的标记被跳过。
    #[test]
    fn command_mode_yields_option_bytes() {
        let mut wire = encode_settings("Cj");
        wire.extend_from_slice(&[MARKER, b'2', 0x00]);
        wire.extend_from_slice(&encode_settings("d"));

        let mut units = Vec::new();
        decode_stream(ReadMode::BeastCommand, &wire, &mut units);
        assert_eq!(
            units,
            vec![
                Decoded::Command(b'C'),
                Decoded::Command(b'j'),
                Decoded::Command(0x00),
                Decoded::Command(b'd'),
            ]
        );
    }

    /// 设置字符串逐字符编码为命令帧。
    #[test]
    fn settings_encode_one_command_frame_per_flag() {
        assert_eq!(
            encode_settings("Cd"),
            vec![MARKER, b'1', b'C', MARKER, b'1', b'd']
        );
        assert_eq!(BEAST_KEEPALIVE[0], MARKER);
        assert_eq!(BEAST_KEEPALIVE.len(), 2 + 7 + 2);
    }

    fn arb_frame() -> impl Strategy<Value = BeastFrame> {
        (0u8..3, proptest::array::uniform6(any::<u8>()), any::<u8>()).prop_flat_map(
            |(kind, mlat, signal)| {
                let kind = match kind {
                    0 => FrameKind::ModeAc,
                    1 => FrameKind::ModeSShort,
                    _ => FrameKind::ModeSLong,
                };
                proptest::collection::vec(any::<u8>(), kind.payload_len()).prop_map(
                    move |payload| BeastFrame {
                        kind,
                        mlat,
                        signal,
                        payload,
                    },
                )
            },
        )
    }

    proptest! {
        /// 任意帧序列、任意读取边界切分，重组结果与一次性解码完全一致。
        #[test]
        fn prop_reassembly_is_split_invariant(
            frames in proptest::collection::vec(arb_frame(), 1..6),
            cuts in proptest::collection::vec(1usize..16, 0..12),
        ) {
            let mut wire = Vec::new();
            for f in &frames {
                wire.extend_from_slice(&encode_frame(f));
            }

            let mut asm = Reassembler::new();
            let mut rest: &[u8] = &wire;
            for cut in cuts {
                let take = cut.min(rest.len());
                let (chunk, tail) = rest.split_at(take);
                asm.feed(ReadMode::Beast, chunk);
                rest = tail;
            }
            asm.feed(ReadMode::Beast, rest);

            let expected: Vec<Decoded> =
                frames.into_iter().map(Decoded::Frame).collect();
            prop_assert_eq!(asm.units, expected);
            prop_assert!(asm.buf.is_empty());
        }

        /// 行模式同样与切分边界无关。
        #[test]
        fn prop_line_reassembly_is_split_invariant(
            records in proptest::collection::vec(
                proptest::collection::vec(1u8..=255u8, 0..12)
                    .prop_map(|v| v.into_iter().filter(|&b| b != b'\n' && b != b'\r').collect::<Vec<u8>>()),
                1..6,
            ),
            cut in 1usize..8,
        ) {
            let mut wire = Vec::new();
            for r in &records {
                wire.extend_from_slice(r);
                wire.push(b'\n');
            }

            let mut asm = Reassembler::new();
            for chunk in wire.chunks(cut) {
                asm.feed(ReadMode::AsciiLine { sep: b'\n' }, chunk);
            }

            let expected: Vec<Decoded> =
                records.into_iter().map(Decoded::Record).collect();
            prop_assert_eq!(asm.units, expected);
        }
    }
}
