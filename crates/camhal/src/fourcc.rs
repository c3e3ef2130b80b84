// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Transport (DRM) format codes as carried by registered buffers.
#![forbid(unsafe_code)]

use core::{fmt, result::Result};

/// A four character code, stored in the little-endian byte order used by DRM
/// format definitions (`'N','V','1','2'` is `0x3231564e`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const R8: FourCC = FourCC(*b"R8  ");
    pub const R16: FourCC = FourCC(*b"R16 ");
    pub const NV12: FourCC = FourCC(*b"NV12");
    pub const NV21: FourCC = FourCC(*b"NV21");
    pub const YU12: FourCC = FourCC(*b"YU12");
    pub const YV12: FourCC = FourCC(*b"YV12");
    pub const YUYV: FourCC = FourCC(*b"YUYV");
    pub const ABGR8888: FourCC = FourCC(*b"AB24");
    pub const XBGR8888: FourCC = FourCC(*b"XB24");
    pub const ARGB8888: FourCC = FourCC(*b"AR24");

    /// Number of planes a buffer of this format carries, `None` for codes the
    /// adapter does not know how to lay out.
    pub fn num_planes(self) -> Option<usize> {
        match self {
            FourCC::NV12 | FourCC::NV21 => Some(2),
            FourCC::YU12 | FourCC::YV12 => Some(3),
            FourCC::R8
            | FourCC::R16
            | FourCC::YUYV
            | FourCC::ABGR8888
            | FourCC::XBGR8888
            | FourCC::ARGB8888 => Some(1),
            _ => None,
        }
    }

    /// Whether the format is one of the 4:2:0 YUV layouts.
    pub fn is_yuv420(self) -> bool {
        matches!(
            self,
            FourCC::NV12 | FourCC::NV21 | FourCC::YU12 | FourCC::YV12
        )
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        u32::from_le_bytes(val.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match core::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s.trim_end()),
            Err(_) => {
                // format!() panics on fmt::Error so fall back to escapes
                let b = &self.0;
                f.write_fmt(format_args!(
                    "{}{}{}{}",
                    core::ascii::escape_default(b[0]),
                    core::ascii::escape_default(b[1]),
                    core::ascii::escape_default(b[2]),
                    core::ascii::escape_default(b[3])
                ))
            }
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("FourCC")
            .field(&format_args!("{}", self))
            .field(&format_args!("{:#010x}", u32::from(*self)))
            .finish()
    }
}
