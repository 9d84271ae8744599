use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// 引入模块
mod config;
mod dispatcher;
mod error;
mod flag_class;
mod iptables;
mod modifier;
mod packet_view;
mod policy;
mod port_set;
mod shutdown;
mod stats;
mod token_bucket;
mod verdict;
mod worker;

use clap::Parser;
use tracing::{error, info, warn};

use crate::{
    config::{Args, Config},
    dispatcher::Dispatcher,
    error::{Error, RuleError, TransportError},
    iptables::RuleGuard,
    stats::{Reporter, Stats},
    worker::WorkerPool,
};

fn install_rules(config: &Config) -> Result<Option<RuleGuard>, RuleError> {
    if !config.install_rules {
        info!("跳过 iptables 规则安装");
        return Ok(None);
    }
    if !iptables::is_root() {
        return Err(RuleError::NotRoot);
    }
    if config.flush_chain {
        iptables::flush_chain()?;
    }
    let guard = RuleGuard::install(config.policy.ports(), &config.queues)?;
    info!("已安装 {} 条规则", guard.count());
    Ok(Some(guard))
}

fn run(args: Args) -> Result<(), Error> {
    let config = Arc::new(Config::try_from(args)?);

    info!("监听源端口: {}", config.policy.ports());
    for class in flag_class::FlagClass::ALL {
        let entry = config.policy.entry(class);
        if entry.enabled {
            info!("{class}: 窗口改写为 {}", entry.window);
        } else {
            info!("{class}: 不改写");
        }
    }
    if config.policy.enabled_classes().count() == 0 {
        warn!("没有启用任何类别，所有包都会原样放行");
    }

    shutdown::install().map_err(TransportError::Signal)?;

    let dispatcher = Arc::new(Dispatcher::new(config.policy.clone()));
    let stats = Arc::new(Stats::new());

    // 先打开队列再装规则，保证被导入队列的包一定有人处理
    let pool = WorkerPool::start(config.clone(), dispatcher, stats.clone())?;

    let rules = match install_rules(&config) {
        Ok(rules) => rules,
        Err(e) => {
            shutdown::request();
            let _ = pool.stop_and_join();
            return Err(e.into());
        }
    };

    let reporter = match config.stats_interval {
        Some(interval) => Reporter::spawn(stats.clone(), interval).unwrap_or_else(|e| {
            warn!("统计线程启动失败: {e}");
            Reporter::idle(stats.clone())
        }),
        None => Reporter::idle(stats.clone()),
    };

    info!("开始监听网络数据包...");
    while !shutdown::requested() && !pool.any_finished() {
        thread::sleep(Duration::from_millis(50));
    }
    shutdown::request();
    info!("正在退出...");

    // 先撤规则，不再有新包进队列，再让 worker 排空剩余的包
    drop(rules);
    let result = pool.stop_and_join();

    // worker 已经全部退出，累计值不会再变
    reporter.finish();
    result
}

fn main() -> ExitCode {
    // 日志由后台线程写出，worker 只往缓冲里塞，缓冲满了直接丢弃
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
