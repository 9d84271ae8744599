use crate::flag_class::FlagClass;
use crate::modifier::MutationError;
use crate::packet_view::DecodeError;

/// 每个被截获的包恰好产生一个 Verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// 原样放行
    Accept,
    /// 用新字节替换后放行
    AcceptModified(Vec<u8>),
}

/// 包在状态机里走到了哪条终止路径，供统计和诊断使用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotTcp,
    Malformed(DecodeError),
    PortMiss,
    Unclassified,
    Disabled(FlagClass),
    Rewritten { class: FlagClass, from: u16, to: u16 },
    /// 窗口本来就是目标值，改写后字节不变
    Unchanged(FlagClass),
    MutationFailed(FlagClass, MutationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub verdict: Verdict,
    pub outcome: Outcome,
}

impl Dispatch {
    pub fn accept(outcome: Outcome) -> Self {
        Self {
            verdict: Verdict::Accept,
            outcome,
        }
    }
}
