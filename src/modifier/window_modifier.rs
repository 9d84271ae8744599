use pnet_packet::tcp::{self, MutableTcpPacket};

use crate::modifier::{MutationError, PacketModifier};
use crate::packet_view::PacketView;

// ==========================================
// TCP 接收窗口改写器
// 只动 TCP 头的 window 和 checksum，IP 头 (包括 IP 校验和) 一个字节都不碰
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowModifier;

impl WindowModifier {
    pub fn new() -> Self {
        Self
    }
}

impl PacketModifier for WindowModifier {
    fn rewrite(&self, view: &PacketView<'_>, window: u16) -> Result<Vec<u8>, MutationError> {
        // 尾部填充原样保留
        let mut buf = view.bytes().to_vec();
        let buffer = buf.len();

        let (start, end) = (view.ip_header_len, view.total_len);
        let segment = buf
            .get_mut(start..end)
            .ok_or(MutationError::SegmentOutOfBounds { start, end, buffer })?;
        let seg_len = segment.len();

        let mut tcp = MutableTcpPacket::new(segment).ok_or(MutationError::SegmentTooShort(seg_len))?;
        tcp.set_window(window);

        // 伪首部 (src/dst/proto/长度) + 整个 TCP 段，计算时跳过 checksum 字段本身
        let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &view.src, &view.dst);
        tcp.set_checksum(checksum);

        Ok(buf)
    }
}
