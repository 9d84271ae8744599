use std::fmt;

// TCP 头第 13 字节的控制位
const FIN: u16 = 0x01;
const SYN: u16 = 0x02;
const RST: u16 = 0x04;
const PSH: u16 = 0x08;
const ACK: u16 = 0x10;

/// 分类只关心的 5 个控制位，URG/ECE/CWR 不参与判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlagSet {
    pub syn: bool,
    pub ack: bool,
    pub psh: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlagSet {
    pub fn from_bits(bits: u16) -> Self {
        Self {
            syn: bits & SYN != 0,
            ack: bits & ACK != 0,
            psh: bits & PSH != 0,
            fin: bits & FIN != 0,
            rst: bits & RST != 0,
        }
    }
}

impl fmt::Display for TcpFlagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SYN={} ACK={} PSH={} FIN={} RST={}",
            self.syn as u8, self.ack as u8, self.psh as u8, self.fin as u8, self.rst as u8
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagClass {
    SynAck,
    PureAck,
    PshAck,
    FinAck,
}

impl FlagClass {
    /// 判定顺序即优先级，先命中者胜
    pub const ALL: [FlagClass; 4] = [
        FlagClass::SynAck,
        FlagClass::PureAck,
        FlagClass::PshAck,
        FlagClass::FinAck,
    ];

    pub fn index(self) -> usize {
        match self {
            FlagClass::SynAck => 0,
            FlagClass::PureAck => 1,
            FlagClass::PshAck => 2,
            FlagClass::FinAck => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FlagClass::SynAck => "SYN-ACK",
            FlagClass::PureAck => "ACK",
            FlagClass::PshAck => "PSH-ACK",
            FlagClass::FinAck => "FIN-ACK",
        }
    }

    /// iptables `--tcp-flags SYN,RST,ACK,FIN,PSH <mask>` 里的 mask 部分
    pub fn iptables_mask(self) -> &'static str {
        match self {
            FlagClass::SynAck => "SYN,ACK",
            FlagClass::PureAck => "ACK",
            FlagClass::PshAck => "PSH,ACK",
            FlagClass::FinAck => "FIN,ACK",
        }
    }

    fn matches(self, f: TcpFlagSet) -> bool {
        match self {
            FlagClass::SynAck => f.syn && f.ack,
            FlagClass::PureAck => f.ack && !f.psh && !f.fin && !f.syn && !f.rst,
            FlagClass::PshAck => f.psh && f.ack,
            FlagClass::FinAck => f.fin && f.ack,
        }
    }
}

impl fmt::Display for FlagClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn classify(flags: TcpFlagSet) -> Option<FlagClass> {
    FlagClass::ALL.into_iter().find(|class| class.matches(flags))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(syn: bool, ack: bool, psh: bool, fin: bool, rst: bool) -> TcpFlagSet {
        TcpFlagSet { syn, ack, psh, fin, rst }
    }

    #[test]
    fn classify_basic_combinations() {
        assert_eq!(classify(flags(true, true, false, false, false)), Some(FlagClass::SynAck));
        assert_eq!(classify(flags(false, true, false, false, false)), Some(FlagClass::PureAck));
        assert_eq!(classify(flags(false, true, true, false, false)), Some(FlagClass::PshAck));
        assert_eq!(classify(flags(false, true, false, true, false)), Some(FlagClass::FinAck));
    }

    #[test]
    fn classify_without_ack_is_unclassified() {
        assert_eq!(classify(flags(true, false, false, false, false)), None);
        assert_eq!(classify(flags(false, false, true, true, false)), None);
        assert_eq!(classify(flags(false, false, false, false, true)), None);
        assert_eq!(classify(TcpFlagSet::default()), None);
    }

    #[test]
    fn rst_ack_is_not_a_pure_ack() {
        assert_eq!(classify(flags(false, true, false, false, true)), None);
    }

    #[test]
    fn psh_fin_ack_prefers_psh_ack() {
        assert_eq!(classify(flags(false, true, true, true, false)), Some(FlagClass::PshAck));
    }

    #[test]
    fn syn_wins_over_everything() {
        assert_eq!(classify(flags(true, true, true, true, true)), Some(FlagClass::SynAck));
    }

    #[test]
    fn classify_matches_first_class_for_all_32_combinations() {
        for bits in 0u16..32 {
            let f = TcpFlagSet {
                syn: bits & 1 != 0,
                ack: bits & 2 != 0,
                psh: bits & 4 != 0,
                fin: bits & 8 != 0,
                rst: bits & 16 != 0,
            };
            let expected = if f.syn && f.ack {
                Some(FlagClass::SynAck)
            } else if f.ack && !f.psh && !f.fin && !f.syn && !f.rst {
                Some(FlagClass::PureAck)
            } else if f.psh && f.ack {
                Some(FlagClass::PshAck)
            } else if f.fin && f.ack {
                Some(FlagClass::FinAck)
            } else {
                None
            };
            assert_eq!(classify(f), expected, "flags {f}");
            // 纯函数，重复调用结果不变
            assert_eq!(classify(f), classify(f));
        }
    }

    #[test]
    fn from_bits_ignores_urg_ece_cwr() {
        let f = TcpFlagSet::from_bits(0x20 | 0x40 | 0x80 | ACK);
        assert_eq!(f, flags(false, true, false, false, false));
        assert_eq!(classify(f), Some(FlagClass::PureAck));
    }

    #[test]
    fn index_follows_priority_order() {
        for (i, class) in FlagClass::ALL.into_iter().enumerate() {
            assert_eq!(class.index(), i);
        }
    }
}
