use std::process::Command;

use tracing::{info, warn};

use crate::config::QueueRange;
use crate::error::RuleError;
use crate::flag_class::FlagClass;
use crate::port_set::PortSet;

const IPTABLES: &str = "iptables";
const TABLE: &str = "filter";
const CHAIN: &str = "OUTPUT";

/// 一条规则的匹配部分 (不含 -A/-C/-D 和表/链)
pub fn rule_args(ports: &PortSet, class: FlagClass, queues: QueueRange) -> Vec<String> {
    let sport = ports.to_string();
    let balance = queues.to_string();
    [
        "-p",
        "tcp",
        "-m",
        "multiport",
        "--sport",
        sport.as_str(),
        "--tcp-flags",
        "SYN,RST,ACK,FIN,PSH",
        class.iptables_mask(),
        "-j",
        "NFQUEUE",
        "--queue-balance",
        balance.as_str(),
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

pub fn is_root() -> bool {
    // SAFETY: geteuid 没有失败路径
    unsafe { libc::geteuid() == 0 }
}

fn run(op: &str, rule: &[String]) -> Result<bool, RuleError> {
    let output = Command::new(IPTABLES)
        .args(["-t", TABLE, op, CHAIN])
        .args(rule)
        .output()
        .map_err(RuleError::Spawn)?;

    if output.status.success() {
        return Ok(true);
    }
    // -C 找不到规则时返回 1，这不是错误
    if op == "-C" && output.status.code() == Some(1) {
        return Ok(false);
    }
    Err(RuleError::Failed {
        args: format!("-t {TABLE} {op} {CHAIN} {}", rule.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

pub fn flush_chain() -> Result<(), RuleError> {
    run("-F", &[])?;
    info!("已清空 {TABLE}/{CHAIN} 链");
    Ok(())
}

// ==========================================
// 规则守卫：持有期间规则生效，Drop 时删除本进程添加的规则
// ==========================================
pub struct RuleGuard {
    installed: Vec<Vec<String>>,
}

impl RuleGuard {
    /// 四类规则全部添加，任一失败时回滚已添加的部分
    pub fn install(ports: &PortSet, queues: &[QueueRange; 4]) -> Result<Self, RuleError> {
        let mut guard = RuleGuard {
            installed: Vec::new(),
        };

        for class in FlagClass::ALL {
            let rule = rule_args(ports, class, queues[class.index()]);
            // append-unique: 已存在则不重复添加，也不归本进程删除
            if run("-C", &rule)? {
                info!("规则已存在，跳过: {}", rule.join(" "));
                continue;
            }
            run("-A", &rule)?;
            info!("成功添加规则: {}", rule.join(" "));
            guard.installed.push(rule);
        }

        Ok(guard)
    }

    pub fn count(&self) -> usize {
        self.installed.len()
    }
}

impl Drop for RuleGuard {
    fn drop(&mut self) {
        for rule in self.installed.drain(..).rev() {
            match run("-D", &rule) {
                Ok(_) => info!("成功删除规则: {}", rule.join(" ")),
                Err(e) => warn!("删除规则失败: {e}"),
            }
        }
    }
}
