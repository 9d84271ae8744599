use crate::flag_class::classify;
use crate::modifier::{PacketModifier, WindowModifier};
use crate::packet_view::PacketView;
use crate::policy::PolicyTable;
use crate::verdict::{Dispatch, Outcome, Verdict};

// ==========================================
// Verdict 分发器
// Received -> Decoded -> Classified -> PolicyChecked -> (Mutated | PassThrough) -> Verdicted
// 没有任何可变状态，多个 worker 线程可以同时调用同一个实例
// 这里不打日志，分发结果由调用方在 verdict 之后再输出
// ==========================================
pub struct Dispatcher<M = WindowModifier> {
    policy: PolicyTable,
    modifier: M,
}

impl Dispatcher<WindowModifier> {
    pub fn new(policy: PolicyTable) -> Self {
        Self::with_modifier(policy, WindowModifier::new())
    }
}

impl<M: PacketModifier> Dispatcher<M> {
    pub fn with_modifier(policy: PolicyTable, modifier: M) -> Self {
        Self { policy, modifier }
    }

    pub fn dispatch(&self, raw: &[u8]) -> Dispatch {
        // Received -> Decoded
        let view = match PacketView::decode(raw) {
            Ok(view) => view,
            Err(e) if e.is_malformed() => return Dispatch::accept(Outcome::Malformed(e)),
            Err(_) => return Dispatch::accept(Outcome::NotTcp),
        };

        // 端口不在白名单里的包连分类都不做
        if !self.policy.is_eligible(view.src_port) {
            return Dispatch::accept(Outcome::PortMiss);
        }

        // Decoded -> Classified
        let Some(class) = classify(view.flags) else {
            return Dispatch::accept(Outcome::Unclassified);
        };

        // Classified -> PolicyChecked
        let Some(window) = self.policy.lookup(view.src_port, class) else {
            return Dispatch::accept(Outcome::Disabled(class));
        };

        // PolicyChecked -> Mutated，失败时退回原包
        match self.modifier.rewrite(&view, window) {
            Ok(bytes) if bytes == raw => Dispatch::accept(Outcome::Unchanged(class)),
            Ok(bytes) => Dispatch {
                verdict: Verdict::AcceptModified(bytes),
                outcome: Outcome::Rewritten {
                    class,
                    from: view.window,
                    to: window,
                },
            },
            Err(e) => Dispatch::accept(Outcome::MutationFailed(class, e)),
        }
    }
}
