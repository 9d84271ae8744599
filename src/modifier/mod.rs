use thiserror::Error;

use crate::packet_view::PacketView;

mod window_modifier;

pub use window_modifier::WindowModifier;

/// 改写失败只影响当前这个包，调用方应原样放行
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MutationError {
    #[error("TCP 段范围 {start}..{end} 超出缓冲区 {buffer}")]
    SegmentOutOfBounds {
        start: usize,
        end: usize,
        buffer: usize,
    },
    #[error("TCP 段长度 {0} 不足以容纳 TCP 头")]
    SegmentTooShort(usize),
}

pub trait PacketModifier {
    fn rewrite(&self, view: &PacketView<'_>, window: u16) -> Result<Vec<u8>, MutationError>;
}
