use std::io;

use thiserror::Error;

use crate::flag_class::FlagClass;

/// 启动期配置错误，出现即退出，此时还没有碰过 iptables 和队列
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("端口列表为空")]
    EmptyPortList,
    #[error("非法端口 `{0}`")]
    InvalidPort(String),
    #[error("端口范围 `{0}` 起点大于终点")]
    ReversedPortRange(String),
    #[error("端口列表 {0} 项超出 multiport 上限 15")]
    TooManyPorts(usize),
    #[error("{class} 窗口值 {value} 超出 16 位范围")]
    WindowOutOfRange { class: FlagClass, value: u32 },
    #[error("{0} 已启用但未指定窗口值")]
    MissingWindow(FlagClass),
    #[error("非法队列范围 `{0}`")]
    InvalidQueueRange(String),
    #[error("队列范围 {0} 与 {1} 重叠")]
    OverlappingQueueRanges(String, String),
    #[error("worker 数量必须大于 0")]
    NoWorkers,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("打开 nfqueue 失败: {0}")]
    Open(#[source] io::Error),
    #[error("绑定队列 {queue} 失败: {source}")]
    Bind {
        queue: u16,
        #[source]
        source: io::Error,
    },
    #[error("设置队列 {queue} 参数失败: {source}")]
    Setup {
        queue: u16,
        #[source]
        source: io::Error,
    },
    #[error("注册信号处理失败: {0}")]
    Signal(#[source] io::Error),
    #[error("创建线程失败: {0}")]
    Spawn(#[source] io::Error),
    #[error("worker 线程异常退出")]
    WorkerPanicked,
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("需要 root 权限才能修改 iptables")]
    NotRoot,
    #[error("执行 iptables 失败: {0}")]
    Spawn(#[source] io::Error),
    #[error("iptables {args} 返回 {status}: {stderr}")]
    Failed {
        args: String,
        status: String,
        stderr: String,
    },
}

/// 内核拒收 verdict，队列已失步，不能继续处理
#[derive(Debug, Error)]
#[error("队列 {queue} 下发 verdict 失败: {source}")]
pub struct VerdictError {
    pub queue: u16,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
}
