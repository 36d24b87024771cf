use serde::{Deserialize, Serialize};
use std::fmt;

/// 编排器可向设备下发的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorCommand {
    /// 开始上传待同步的记录会话
    Sync,
    /// 关闭无线电以降低信道竞争与功耗
    WifiSleep,
    /// 重启设备（用于恢复卡死的传输）
    Reboot,
}

impl SensorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SensorCommand::Sync => "sync",
            SensorCommand::WifiSleep => "wifi_sleep",
            SensorCommand::Reboot => "reboot",
        }
    }
}

impl fmt::Display for SensorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
