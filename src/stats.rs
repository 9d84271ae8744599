use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use tracing::info;

use crate::flag_class::FlagClass;
use crate::verdict::Outcome;

// ==========================================
// 计数器只做 Relaxed 原子加，热路径不打日志，报表由独立线程输出
// ==========================================
#[derive(Default)]
pub struct Stats {
    received: AtomicU64,
    not_tcp: AtomicU64,
    malformed: AtomicU64,
    port_miss: AtomicU64,
    unclassified: AtomicU64,
    disabled: AtomicU64,
    unchanged: AtomicU64,
    mutation_failed: AtomicU64,
    rewritten: [AtomicU64; 4],
    suppressed_logs: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub not_tcp: u64,
    pub malformed: u64,
    pub port_miss: u64,
    pub unclassified: u64,
    pub disabled: u64,
    pub unchanged: u64,
    pub mutation_failed: u64,
    pub rewritten: [u64; 4],
    pub suppressed_logs: u64,
}

impl StatsSnapshot {
    pub fn rewritten_total(&self) -> u64 {
        self.rewritten.iter().sum()
    }

    /// 与上一次快照的差值，即这个统计周期内的增量
    pub fn since(&self, prev: &StatsSnapshot) -> StatsSnapshot {
        let mut rewritten = [0; 4];
        for (i, r) in rewritten.iter_mut().enumerate() {
            *r = self.rewritten[i].saturating_sub(prev.rewritten[i]);
        }
        StatsSnapshot {
            received: self.received.saturating_sub(prev.received),
            not_tcp: self.not_tcp.saturating_sub(prev.not_tcp),
            malformed: self.malformed.saturating_sub(prev.malformed),
            port_miss: self.port_miss.saturating_sub(prev.port_miss),
            unclassified: self.unclassified.saturating_sub(prev.unclassified),
            disabled: self.disabled.saturating_sub(prev.disabled),
            unchanged: self.unchanged.saturating_sub(prev.unchanged),
            mutation_failed: self.mutation_failed.saturating_sub(prev.mutation_failed),
            rewritten,
            suppressed_logs: self.suppressed_logs.saturating_sub(prev.suppressed_logs),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &Outcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::NotTcp => &self.not_tcp,
            Outcome::Malformed(_) => &self.malformed,
            Outcome::PortMiss => &self.port_miss,
            Outcome::Unclassified => &self.unclassified,
            Outcome::Disabled(_) => &self.disabled,
            Outcome::Unchanged(_) => &self.unchanged,
            Outcome::MutationFailed(..) => &self.mutation_failed,
            Outcome::Rewritten { class, .. } => &self.rewritten[class.index()],
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed_log(&self) {
        self.suppressed_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            received: load(&self.received),
            not_tcp: load(&self.not_tcp),
            malformed: load(&self.malformed),
            port_miss: load(&self.port_miss),
            unclassified: load(&self.unclassified),
            disabled: load(&self.disabled),
            unchanged: load(&self.unchanged),
            mutation_failed: load(&self.mutation_failed),
            rewritten: self.rewritten.each_ref().map(load),
            suppressed_logs: load(&self.suppressed_logs),
        }
    }
}

fn report(delta: &StatsSnapshot, elapsed: Duration) {
    let now_str = Local::now().format("%H:%M:%S");
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let per_class = FlagClass::ALL
        .iter()
        .map(|c| format!("{}={}", c, delta.rewritten[c.index()]))
        .collect::<Vec<_>>()
        .join(" ");

    info!(
        "[{}] 收包 {} ({:.1}/s) 改写 {} [{}] 未变 {} 放行: 端口不符 {} 未分类 {} 未启用 {} 非TCP {} 畸形 {} 改写失败 {} 日志抑制 {}",
        now_str,
        delta.received,
        delta.received as f64 / secs,
        delta.rewritten_total(),
        per_class,
        delta.unchanged,
        delta.port_miss,
        delta.unclassified,
        delta.disabled,
        delta.not_tcp,
        delta.malformed,
        delta.mutation_failed,
        delta.suppressed_logs,
    );
}

// ==========================================
// 统计线程：有自己的停止标志，由 main 在 worker 全部排空之后再停，
// 这样累计值里包含退出阶段放行的包
// ==========================================
pub struct Reporter {
    stats: Arc<Stats>,
    started: Instant,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    /// 不起线程，只在 finish 时给出累计值 (统计间隔为 0 时使用)
    pub fn idle(stats: Arc<Stats>) -> Self {
        Self {
            stats,
            started: Instant::now(),
            stop: Arc::new(AtomicBool::new(true)),
            handle: None,
        }
    }

    /// 每隔 interval 输出一次增量
    pub fn spawn(stats: Arc<Stats>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stats = stats.clone();
            let stop = stop.clone();
            thread::Builder::new().name("stats".into()).spawn(move || {
                let mut last = StatsSnapshot::default();
                let mut last_report = Instant::now();

                while !stop.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(100));
                    if last_report.elapsed() >= interval {
                        let snap = stats.snapshot();
                        report(&snap.since(&last), last_report.elapsed());
                        last = snap;
                        last_report = Instant::now();
                    }
                }
            })?
        };

        Ok(Self {
            stats,
            started: Instant::now(),
            stop,
            handle: Some(handle),
        })
    }

    /// 停掉周期输出，打印并返回累计值；必须在 worker join 之后调用
    pub fn finish(mut self) -> StatsSnapshot {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let total = self.stats.snapshot();
        info!("累计统计:");
        report(&total, self.started.elapsed());
        total
    }
}
