use std::fmt;

use crate::error::ConfigError;

// iptables multiport 最多 15 个端口，范围算两个
const MULTIPORT_LIMIT: usize = 15;

/// 源端口白名单，写法与 `-m multiport --sport` 一致: `80,443,8000:8080`
#[derive(Clone)]
pub struct PortSet {
    bits: Box<[u64; 1024]>,
    entries: Vec<(u16, u16)>,
}

impl PortSet {
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        let mut set = PortSet {
            bits: Box::new([0; 1024]),
            entries: Vec::new(),
        };
        let mut weight = 0;

        for item in list.split(',').map(str::trim) {
            if item.is_empty() {
                continue;
            }
            let (lo, hi) = match item.split_once(':') {
                Some((lo, hi)) => (parse_port(lo, item)?, parse_port(hi, item)?),
                None => {
                    let p = parse_port(item, item)?;
                    (p, p)
                }
            };
            if lo > hi {
                return Err(ConfigError::ReversedPortRange(item.to_string()));
            }
            weight += if lo == hi { 1 } else { 2 };
            set.insert_range(lo, hi);
            set.entries.push((lo, hi));
        }

        if set.entries.is_empty() {
            return Err(ConfigError::EmptyPortList);
        }
        if weight > MULTIPORT_LIMIT {
            return Err(ConfigError::TooManyPorts(weight));
        }
        Ok(set)
    }

    fn insert_range(&mut self, lo: u16, hi: u16) {
        for port in lo..=hi {
            self.bits[port as usize / 64] |= 1 << (port % 64);
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.bits[port as usize / 64] & (1 << (port % 64)) != 0
    }
}

fn parse_port(s: &str, item: &str) -> Result<u16, ConfigError> {
    match s.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::InvalidPort(item.to_string())),
        Ok(p) => Ok(p),
    }
}

/// 规范化后的 multiport 参数
impl fmt::Display for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &(lo, hi)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}:{hi}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PortSet({self})")
    }
}
