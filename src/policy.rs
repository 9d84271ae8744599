use crate::error::ConfigError;
use crate::flag_class::FlagClass;
use crate::port_set::PortSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyEntry {
    pub enabled: bool,
    pub window: u16,
}

impl PolicyEntry {
    pub const DISABLED: PolicyEntry = PolicyEntry {
        enabled: false,
        window: 0,
    };

    /// 命令行里窗口值按 u32 读入，这里做 16 位校验
    pub fn from_args(
        class: FlagClass,
        enabled: bool,
        window: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let window = match window {
            Some(value) => {
                u16::try_from(value).map_err(|_| ConfigError::WindowOutOfRange { class, value })?
            }
            None if enabled => return Err(ConfigError::MissingWindow(class)),
            None => 0,
        };
        Ok(Self { enabled, window })
    }
}

/// 启动时构建一次，之后只读，热路径上不需要任何锁
#[derive(Debug, Clone)]
pub struct PolicyTable {
    ports: PortSet,
    entries: [PolicyEntry; 4],
}

impl PolicyTable {
    pub fn new(ports: PortSet, entries: [PolicyEntry; 4]) -> Self {
        Self { ports, entries }
    }

    pub fn ports(&self) -> &PortSet {
        &self.ports
    }

    pub fn entry(&self, class: FlagClass) -> PolicyEntry {
        self.entries[class.index()]
    }

    pub fn is_eligible(&self, port: u16) -> bool {
        self.ports.contains(port)
    }

    pub fn lookup(&self, port: u16, class: FlagClass) -> Option<u16> {
        if !self.ports.contains(port) {
            return None;
        }
        let entry = self.entry(class);
        entry.enabled.then_some(entry.window)
    }

    pub fn enabled_classes(&self) -> impl Iterator<Item = FlagClass> + '_ {
        FlagClass::ALL
            .into_iter()
            .filter(|class| self.entry(*class).enabled)
    }
}
