use fleet_types::SensorCommand;

/// 指令帧合成器
///
/// 编排器只决定发什么指令，帧格式由协议合成协作者负责；
/// 通过该 trait 保持可替换。
pub trait CommandComposer: Send + Sync {
    /// 合成一条发往设备的完整帧
    fn compose(&self, command: SensorCommand) -> Vec<u8>;
}

const HEADER_ID_COMMAND: u8 = 0x7C;
const CMD_DEVICE: u8 = 1 << 5;
const DEVICE_INDEX: u16 = 0x0000;

const OP_REBOOT: u8 = 2;
const OP_SYNC_DATA: u8 = 57;
const OP_WIFI_SLEEP: u8 = 59;

/// 设备二进制指令帧的默认合成实现
///
/// 帧布局：头标识、净荷长度、设备索引（大端）、指令类、操作码、CRC-16/ARC（大端）。
#[derive(Debug, Default, Clone)]
pub struct FrameComposer;

impl FrameComposer {
    pub fn new() -> Self {
        Self
    }

    fn opcode(command: SensorCommand) -> u8 {
        match command {
            SensorCommand::Sync => OP_SYNC_DATA,
            SensorCommand::WifiSleep => OP_WIFI_SLEEP,
            SensorCommand::Reboot => OP_REBOOT,
        }
    }
}

impl CommandComposer for FrameComposer {
    fn compose(&self, command: SensorCommand) -> Vec<u8> {
        let mut frame = Vec::with_capacity(8);
        frame.push(HEADER_ID_COMMAND);
        frame.push(4); // packet length
        frame.extend_from_slice(&DEVICE_INDEX.to_be_bytes());
        frame.push(CMD_DEVICE);
        frame.push(Self::opcode(command));
        frame.extend_from_slice(&crc16_arc(&frame).to_be_bytes());
        frame
    }
}

/// CRC-16/ARC：多项式 0x8005 反射，初值 0，无输出异或
fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
