use std::net::Ipv4Addr;

use pnet_packet::Packet;
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet_packet::tcp::TcpPacket;
use thiserror::Error;

use crate::flag_class::TcpFlagSet;

const IPV4_MIN_HEADER: usize = 20;
const TCP_MIN_HEADER: usize = 20;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("包长 {0} 不足以容纳 IPv4 头")]
    Truncated(usize),
    #[error("不是 IPv4 (version={0})")]
    NotIpv4(u8),
    #[error("IPv4 头长度 {0} 非法")]
    BadHeaderLength(usize),
    #[error("IPv4 总长度 {total} 与缓冲区 {buffer} 不符")]
    BadTotalLength { total: usize, buffer: usize },
    #[error("不是 TCP (protocol={0})")]
    NotTcp(u8),
    #[error("IPv4 分片")]
    Fragmented,
    #[error("TCP 段长度 {0} 不足以容纳 TCP 头")]
    TruncatedSegment(usize),
    #[error("TCP data offset {offset} 超出段长 {segment}")]
    BadDataOffset { offset: usize, segment: usize },
}

impl DecodeError {
    /// 非 IPv4 / 非 TCP 属于正常放行，其余是畸形包
    pub fn is_malformed(&self) -> bool {
        !matches!(self, DecodeError::NotIpv4(_) | DecodeError::NotTcp(_))
    }
}

/// 单个被截获数据包的只读视图，处理完即丢弃
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlagSet,
    pub window: u16,
    /// IPv4 头长度 (字节)
    pub ip_header_len: usize,
    /// IPv4 Total Length，之后的字节是链路层填充
    pub total_len: usize,
    raw: &'a [u8],
}

impl<'a> PacketView<'a> {
    pub fn decode(raw: &'a [u8]) -> Result<Self, DecodeError> {
        let ip = Ipv4Packet::new(raw).ok_or(DecodeError::Truncated(raw.len()))?;

        if ip.get_version() != 4 {
            return Err(DecodeError::NotIpv4(ip.get_version()));
        }

        let ip_header_len = ip.get_header_length() as usize * 4;
        if ip_header_len < IPV4_MIN_HEADER || ip_header_len > raw.len() {
            return Err(DecodeError::BadHeaderLength(ip_header_len));
        }

        let total_len = ip.get_total_length() as usize;
        if total_len < ip_header_len || total_len > raw.len() {
            return Err(DecodeError::BadTotalLength {
                total: total_len,
                buffer: raw.len(),
            });
        }

        let proto = ip.get_next_level_protocol();
        if proto != IpNextHeaderProtocols::Tcp {
            return Err(DecodeError::NotTcp(proto.0));
        }

        if ip.get_flags() & Ipv4Flags::MoreFragments != 0 || ip.get_fragment_offset() != 0 {
            return Err(DecodeError::Fragmented);
        }

        let segment = &raw[ip_header_len..total_len];
        let tcp =
            TcpPacket::new(segment).ok_or(DecodeError::TruncatedSegment(segment.len()))?;

        let offset = tcp.get_data_offset() as usize * 4;
        if offset < TCP_MIN_HEADER || offset > segment.len() {
            return Err(DecodeError::BadDataOffset {
                offset,
                segment: segment.len(),
            });
        }

        Ok(Self {
            src: ip.get_source(),
            dst: ip.get_destination(),
            src_port: tcp.get_source(),
            dst_port: tcp.get_destination(),
            flags: TcpFlagSet::from_bits(tcp.get_flags() as u16),
            window: tcp.get_window(),
            ip_header_len,
            total_len,
            raw,
        })
    }

    /// 原始字节 (包括可能的尾部填充)
    pub fn bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// TCP 段 (头 + 负载)，不含尾部填充
    pub fn segment(&self) -> &'a [u8] {
        &self.raw[self.ip_header_len..self.total_len]
    }

    pub fn payload_len(&self) -> usize {
        TcpPacket::new(self.segment())
            .map(|tcp| tcp.payload().len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pnet_packet::MutablePacket;
    use pnet_packet::ipv4::{self, MutableIpv4Packet};
    use pnet_packet::tcp::{self as pnet_tcp, MutableTcpPacket};

    pub(crate) struct TestPacket {
        pub src_port: u16,
        pub flags: u8,
        pub window: u16,
        pub payload: Vec<u8>,
        pub options_words: usize,
    }

    impl Default for TestPacket {
        fn default() -> Self {
            Self {
                src_port: 80,
                flags: 0x10,
                window: 64240,
                payload: Vec::new(),
                options_words: 0,
            }
        }
    }

    impl TestPacket {
        /// 构造一个校验和全部正确的 IPv4/TCP 包
        pub(crate) fn build(&self) -> Vec<u8> {
            let tcp_len = 20 + self.options_words * 4 + self.payload.len();
            let total = 20 + tcp_len;
            let mut buf = vec![0u8; total];
            let src = Ipv4Addr::new(10, 0, 0, 1);
            let dst = Ipv4Addr::new(10, 0, 0, 2);

            {
                let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
                ip.set_version(4);
                ip.set_header_length(5);
                ip.set_total_length(total as u16);
                ip.set_identification(0x1234);
                ip.set_flags(Ipv4Flags::DontFragment);
                ip.set_ttl(64);
                ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
                ip.set_source(src);
                ip.set_destination(dst);
                let csum = ipv4::checksum(&ip.to_immutable());
                ip.set_checksum(csum);
            }
            {
                let mut tcp = MutableTcpPacket::new(&mut buf[20..]).unwrap();
                tcp.set_source(self.src_port);
                tcp.set_destination(51000);
                tcp.set_sequence(0xdead_beef);
                tcp.set_acknowledgement(0x0102_0304);
                tcp.set_data_offset(5 + self.options_words as u8);
                tcp.set_flags(self.flags.into());
                tcp.set_window(self.window);
                // NOP 填充选项
                let opt_end = 20 + self.options_words * 4;
                tcp.packet_mut()[20..opt_end].fill(1);
                tcp.packet_mut()[opt_end..].copy_from_slice(&self.payload);
                let csum = pnet_tcp::ipv4_checksum(&tcp.to_immutable(), &src, &dst);
                tcp.set_checksum(csum);
            }
            buf
        }
    }

    pub(crate) fn udp_packet() -> Vec<u8> {
        let mut buf = TestPacket::default().build();
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        let csum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(csum);
        buf
    }

    #[test]
    fn decodes_fields() {
        let raw = TestPacket {
            src_port: 443,
            flags: 0x12,
            window: 29200,
            payload: b"hello".to_vec(),
            ..Default::default()
        }
        .build();
        let view = PacketView::decode(&raw).unwrap();
        assert_eq!(view.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(view.dst, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(view.src_port, 443);
        assert_eq!(view.dst_port, 51000);
        assert!(view.flags.syn && view.flags.ack);
        assert!(!view.flags.psh && !view.flags.fin && !view.flags.rst);
        assert_eq!(view.window, 29200);
        assert_eq!(view.payload_len(), 5);
        assert_eq!(view.segment().len(), 25);
    }

    #[test]
    fn rejects_short_and_non_tcp() {
        assert_eq!(
            PacketView::decode(&[0x45; 10]).unwrap_err(),
            DecodeError::Truncated(10)
        );
        assert_eq!(
            PacketView::decode(&udp_packet()).unwrap_err(),
            DecodeError::NotTcp(17)
        );

        let mut v6 = TestPacket::default().build();
        v6[0] = 0x65;
        assert_eq!(PacketView::decode(&v6).unwrap_err(), DecodeError::NotIpv4(6));
        assert!(!DecodeError::NotTcp(17).is_malformed());
    }

    #[test]
    fn rejects_fragments() {
        let mut raw = TestPacket::default().build();
        {
            let mut ip = MutableIpv4Packet::new(&mut raw).unwrap();
            ip.set_flags(Ipv4Flags::MoreFragments);
        }
        assert_eq!(PacketView::decode(&raw).unwrap_err(), DecodeError::Fragmented);

        let mut raw = TestPacket::default().build();
        {
            let mut ip = MutableIpv4Packet::new(&mut raw).unwrap();
            ip.set_flags(0);
            ip.set_fragment_offset(100);
        }
        assert_eq!(PacketView::decode(&raw).unwrap_err(), DecodeError::Fragmented);
    }

    #[test]
    fn rejects_inconsistent_lengths() {
        let mut raw = TestPacket::default().build();
        raw.truncate(30);
        assert!(matches!(
            PacketView::decode(&raw).unwrap_err(),
            DecodeError::BadTotalLength { total: 40, buffer: 30 }
        ));

        let mut raw = TestPacket::default().build();
        raw[0] = 0x44;
        assert_eq!(
            PacketView::decode(&raw).unwrap_err(),
            DecodeError::BadHeaderLength(16)
        );

        let mut raw = TestPacket::default().build();
        // data offset = 15 words = 60 字节，超过 20 字节的段
        raw[20 + 12] = 0xF0;
        assert!(matches!(
            PacketView::decode(&raw).unwrap_err(),
            DecodeError::BadDataOffset { offset: 60, segment: 20 }
        ));
    }

    #[test]
    fn trailing_padding_is_outside_segment() {
        let mut raw = TestPacket::default().build();
        raw.extend_from_slice(&[0u8; 6]);
        let view = PacketView::decode(&raw).unwrap();
        assert_eq!(view.total_len, 40);
        assert_eq!(view.segment().len(), 20);
        assert_eq!(view.bytes().len(), 46);
    }
}
