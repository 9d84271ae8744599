use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nfq::{Message, Queue, Verdict as NfVerdict};
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, TransportError, VerdictError};
use crate::shutdown;
use crate::stats::Stats;
use crate::token_bucket::TokenBucket;
use crate::verdict::{Outcome, Verdict};

const COPY_RANGE: u16 = 0xFFFF;
const BATCH_LIMIT: usize = 256;
const IDLE_SLEEP: Duration = Duration::from_micros(100);

fn make_queue(queue_num: u16, max_len: u32) -> Result<Queue, TransportError> {
    let mut q = Queue::open().map_err(TransportError::Open)?;
    q.bind(queue_num).map_err(|source| TransportError::Bind {
        queue: queue_num,
        source,
    })?;
    let setup = |source| TransportError::Setup {
        queue: queue_num,
        source,
    };
    q.set_copy_range(queue_num, COPY_RANGE).map_err(setup)?;
    q.set_queue_max_len(queue_num, max_len).map_err(setup)?;
    q.set_nonblocking(true);
    Ok(q)
}

/// 把分发结果写回消息：改写过的换上新载荷，一律 Accept
fn apply_verdict(msg: &mut Message, verdict: Verdict) {
    if let Verdict::AcceptModified(bytes) = verdict {
        msg.set_payload(bytes);
    }
    msg.set_verdict(NfVerdict::Accept);
}

// ==========================================
// 单个包的处理：分发 -> verdict -> 计数 -> 诊断
// verdict 之前不碰日志，诊断输出落在包已经放行之后
// ==========================================
struct Handler {
    dispatcher: Arc<Dispatcher>,
    stats: Arc<Stats>,
    // 热路径告警限流，超出的只计数
    warn_limiter: TokenBucket,
}

impl Handler {
    fn handle(
        &mut self,
        queue_num: u16,
        q: &mut Queue,
        mut msg: Message,
    ) -> Result<(), VerdictError> {
        let dispatch = self.dispatcher.dispatch(msg.get_payload());
        apply_verdict(&mut msg, dispatch.verdict);
        let sent = q.verdict(msg).map_err(|source| VerdictError {
            queue: queue_num,
            source,
        });

        self.stats.record(&dispatch.outcome);
        self.diagnose(queue_num, &dispatch.outcome);
        sent
    }

    fn diagnose(&mut self, queue_num: u16, outcome: &Outcome) {
        match outcome {
            Outcome::Malformed(e) => {
                self.warn(format_args!("队列 {queue_num} 收到畸形包，原样放行: {e}"))
            }
            Outcome::MutationFailed(class, e) => {
                self.warn(format_args!("队列 {queue_num} {class} 改写失败，原样放行: {e}"))
            }
            Outcome::Rewritten { class, from, to } => {
                trace!("队列 {queue_num} {class} 窗口 {from} -> {to}")
            }
            other => trace!("队列 {queue_num} 放行: {other:?}"),
        }
    }

    fn warn(&mut self, args: std::fmt::Arguments<'_>) {
        if self.warn_limiter.try_take() {
            warn!("{args}");
        } else {
            self.stats.record_suppressed_log();
        }
    }
}

struct Worker {
    id: usize,
    queues: Vec<(u16, Queue)>,
    handler: Handler,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn open(
        id: usize,
        queue_nums: &[u16],
        config: &Config,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<Stats>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, TransportError> {
        let queues = queue_nums
            .iter()
            .map(|&n| make_queue(n, config.max_queue_len).map(|q| (n, q)))
            .collect::<Result<Vec<_>, _>>()?;
        let rate = config.log_warn_rate as f64;

        Ok(Self {
            id,
            queues,
            handler: Handler {
                dispatcher,
                stats,
                warn_limiter: TokenBucket::new(rate, rate),
            },
            stop,
        })
    }

    /// 轮询一遍所有队列，直到没有新包或达到批量上限，返回是否处理过包
    fn sweep(&mut self) -> Result<bool, VerdictError> {
        let mut working = false;
        let mut packet_count = 0;

        loop {
            if packet_count >= BATCH_LIMIT {
                break;
            }
            let mut no_packet = true;
            for (queue_num, q) in self.queues.iter_mut() {
                match q.recv() {
                    Ok(msg) => {
                        working = true;
                        no_packet = false;
                        packet_count += 1;
                        self.handler.handle(*queue_num, q, msg)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => self
                        .handler
                        .warn(format_args!("队列 {queue_num} 接收失败: {e}")),
                }
            }
            if no_packet {
                break;
            }
        }

        Ok(working)
    }

    fn run(&mut self) -> Result<(), VerdictError> {
        debug!("worker {} 开始处理 {} 个队列", self.id, self.queues.len());
        loop {
            // 先读 stop 再扫一遍，保证 stop 之后队列里剩下的包也都拿到 verdict
            let stopping = self.stop.load(Ordering::Acquire);
            let working = self.sweep()?;
            if stopping && !working {
                break;
            }
            if !working {
                thread::sleep(IDLE_SLEEP);
            }
        }
        debug!("worker {} 退出，关闭 {} 个队列", self.id, self.queues.len());
        Ok(())
    }
}

// ==========================================
// worker 线程池：启动时全部队列打开成功才算就绪
// ==========================================
pub struct WorkerPool {
    handles: Vec<JoinHandle<Result<(), VerdictError>>>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(
        config: Arc<Config>,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<Stats>,
    ) -> Result<Self, Error> {
        let stop = Arc::new(AtomicBool::new(false));
        let partitions = config.partition_queues();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), TransportError>>();
        let mut pool = WorkerPool {
            handles: Vec::with_capacity(partitions.len()),
            stop: stop.clone(),
        };

        for (id, queue_nums) in partitions.into_iter().enumerate() {
            let config = config.clone();
            let dispatcher = dispatcher.clone();
            let stats = stats.clone();
            let stop = stop.clone();
            let ready = ready_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("nfq-worker-{id}"))
                .spawn(move || {
                    let mut worker =
                        match Worker::open(id, &queue_nums, &config, dispatcher, stats, stop) {
                            Ok(w) => {
                                let _ = ready.send(Ok(()));
                                w
                            }
                            Err(e) => {
                                let _ = ready.send(Err(e));
                                return Ok(());
                            }
                        };
                    let result = worker.run();
                    if result.is_err() {
                        // 一个 worker 失步，整个进程都要停
                        shutdown::request();
                    }
                    result
                });

            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    let _ = pool.stop_and_join();
                    return Err(TransportError::Spawn(e).into());
                }
            }
        }
        drop(ready_tx);

        let mut first_err = None;
        for _ in 0..pool.handles.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                // 线程在发送就绪信号前 panic
                Err(_) => {
                    if first_err.is_none() {
                        first_err = Some(TransportError::WorkerPanicked);
                    }
                    break;
                }
            }
        }
        if let Some(e) = first_err {
            let _ = pool.stop_and_join();
            return Err(e.into());
        }

        info!(
            "{} 个 worker 就绪，共 {} 个队列",
            pool.handles.len(),
            config.queue_numbers().len()
        );
        Ok(pool)
    }

    /// 有 worker 提前退出 (verdict 失败或 panic)
    pub fn any_finished(&self) -> bool {
        self.handles.iter().any(|h| h.is_finished())
    }

    /// 通知所有 worker 排空队列后退出，返回第一个错误
    pub fn stop_and_join(self) -> Result<(), Error> {
        self.stop.store(true, Ordering::Release);
        let mut result = Ok(());
        for handle in self.handles {
            let joined = match handle.join() {
                Ok(r) => r.map_err(Error::from),
                Err(_) => Err(TransportError::WorkerPanicked.into()),
            };
            if let Err(e) = joined {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}
