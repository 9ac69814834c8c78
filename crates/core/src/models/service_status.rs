use std::fmt;

use serde::{Deserialize, Serialize};

/// 服务生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    NotStarted,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl ServiceStatus {
    /// 是否可以开始启动（Stopped 可以重新进入 Starting）
    pub fn can_start(&self) -> bool {
        matches!(self, ServiceStatus::NotStarted | ServiceStatus::Stopped)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, ServiceStatus::Started)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::NotStarted => "NotStarted",
            ServiceStatus::Starting => "Starting",
            ServiceStatus::Started => "Started",
            ServiceStatus::Stopping => "Stopping",
            ServiceStatus::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
