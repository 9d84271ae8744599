use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use signal_hook::consts::{SIGINT, SIGTERM};

// 进程级退出标志，信号和 worker 失败都只是把它置位
static SHUTDOWN: LazyLock<Arc<AtomicBool>> = LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// 注册 SIGINT / SIGTERM，收到后只置位退出标志，由各线程自行收尾
pub fn install() -> io::Result<()> {
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, (*SHUTDOWN).clone())?;
    }
    Ok(())
}

pub fn request() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub fn requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
