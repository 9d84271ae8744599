use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::error::ConfigError;
use crate::flag_class::FlagClass;
use crate::policy::{PolicyEntry, PolicyTable};
use crate::port_set::PortSet;

/// 一段连续的 NFQUEUE 编号，对应 `--queue-balance lo:hi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRange {
    pub lo: u16,
    pub hi: u16,
}

impl QueueRange {
    pub const DEFAULTS: [QueueRange; 4] = [
        QueueRange::new(1000, 1127),
        QueueRange::new(2000, 2127),
        QueueRange::new(3000, 3127),
        QueueRange::new(4000, 4127),
    ];

    pub const fn new(lo: u16, hi: u16) -> Self {
        Self { lo, hi }
    }

    pub fn iter(self) -> impl Iterator<Item = u16> {
        self.lo..=self.hi
    }

    fn overlaps(&self, other: &QueueRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }
}

impl fmt::Display for QueueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lo, self.hi)
    }
}

impl FromStr for QueueRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::InvalidQueueRange(s.to_string());
        let (lo, hi) = match s.split_once(':') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (s.trim(), s.trim()),
        };
        let lo: u16 = lo.parse().map_err(|_| bad())?;
        let hi: u16 = hi.parse().map_err(|_| bad())?;
        if lo > hi {
            return Err(bad());
        }
        Ok(QueueRange { lo, hi })
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "nfq_window",
    about = "通过 NFQUEUE 改写出站 TCP 报文的接收窗口"
)]
pub struct Args {
    /// 源端口列表，multiport 格式: 80,443,8000:8080
    #[arg(short, long)]
    pub ports: String,

    /// 改写 SYN-ACK
    #[arg(long)]
    pub enable_sa: bool,
    #[arg(long, value_name = "WINDOW")]
    pub window_sa: Option<u32>,

    /// 改写纯 ACK
    #[arg(long)]
    pub enable_a: bool,
    #[arg(long, value_name = "WINDOW")]
    pub window_a: Option<u32>,

    /// 改写 PSH-ACK
    #[arg(long)]
    pub enable_pa: bool,
    #[arg(long, value_name = "WINDOW")]
    pub window_pa: Option<u32>,

    /// 改写 FIN-ACK
    #[arg(long)]
    pub enable_fa: bool,
    #[arg(long, value_name = "WINDOW")]
    pub window_fa: Option<u32>,

    #[arg(long, value_name = "LO:HI", default_value_t = QueueRange::DEFAULTS[0])]
    pub queue_sa: QueueRange,
    #[arg(long, value_name = "LO:HI", default_value_t = QueueRange::DEFAULTS[1])]
    pub queue_a: QueueRange,
    #[arg(long, value_name = "LO:HI", default_value_t = QueueRange::DEFAULTS[2])]
    pub queue_pa: QueueRange,
    #[arg(long, value_name = "LO:HI", default_value_t = QueueRange::DEFAULTS[3])]
    pub queue_fa: QueueRange,

    /// 处理线程数，默认等于 CPU 数
    #[arg(long)]
    pub workers: Option<usize>,

    /// 内核侧每个队列的最大排队包数
    #[arg(long, default_value_t = 0xFF)]
    pub max_queue_len: u32,

    /// 不安装 iptables 规则 (规则由外部管理)
    #[arg(long)]
    pub skip_rules: bool,

    /// 安装规则前清空 filter/OUTPUT 链
    #[arg(long, conflicts_with = "skip_rules")]
    pub flush_chain: bool,

    /// 统计输出间隔 (秒)，0 表示关闭周期输出，退出时仍打印累计值
    #[arg(long, default_value_t = 10)]
    pub stats_interval: u64,

    /// 每个线程每秒最多输出的告警条数
    #[arg(long, default_value_t = 20)]
    pub log_warn_rate: u32,
}

/// 启动时从命令行构建，之后只读，以 Arc 分发给各 worker
#[derive(Debug, Clone)]
pub struct Config {
    pub policy: PolicyTable,
    pub queues: [QueueRange; 4],
    pub workers: usize,
    pub max_queue_len: u32,
    pub install_rules: bool,
    pub flush_chain: bool,
    pub stats_interval: Option<Duration>,
    pub log_warn_rate: u32,
}

impl TryFrom<Args> for Config {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let ports = PortSet::parse(&args.ports)?;

        let per_class = [
            (FlagClass::SynAck, args.enable_sa, args.window_sa),
            (FlagClass::PureAck, args.enable_a, args.window_a),
            (FlagClass::PshAck, args.enable_pa, args.window_pa),
            (FlagClass::FinAck, args.enable_fa, args.window_fa),
        ];
        let mut entries = [PolicyEntry::DISABLED; 4];
        for (class, enabled, window) in per_class {
            entries[class.index()] = PolicyEntry::from_args(class, enabled, window)?;
            if !enabled && window.is_some() {
                warn!("{class} 未启用，忽略窗口值 {window:?}");
            }
        }

        let queues = [args.queue_sa, args.queue_a, args.queue_pa, args.queue_fa];
        for (i, a) in queues.iter().enumerate() {
            for b in &queues[i + 1..] {
                if a.overlaps(b) {
                    return Err(ConfigError::OverlappingQueueRanges(
                        a.to_string(),
                        b.to_string(),
                    ));
                }
            }
        }

        let workers = match args.workers {
            Some(0) => return Err(ConfigError::NoWorkers),
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        };

        Ok(Config {
            policy: PolicyTable::new(ports, entries),
            queues,
            workers,
            max_queue_len: args.max_queue_len,
            install_rules: !args.skip_rules,
            flush_chain: args.flush_chain,
            stats_interval: (args.stats_interval > 0)
                .then(|| Duration::from_secs(args.stats_interval)),
            log_warn_rate: args.log_warn_rate,
        })
    }
}

impl Config {
    /// 所有需要打开的队列号，按 SA/A/PA/FA 顺序
    pub fn queue_numbers(&self) -> Vec<u16> {
        self.queues.iter().flat_map(|r| r.iter()).collect()
    }

    /// 把队列号轮流分给各 worker
    pub fn partition_queues(&self) -> Vec<Vec<u16>> {
        let mut buckets = vec![Vec::new(); self.workers];
        for (i, q) in self.queue_numbers().into_iter().enumerate() {
            buckets[i % self.workers].push(q);
        }
        buckets.retain(|b| !b.is_empty());
        buckets
    }
}
