// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::{fourcc::FourCC, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// HAL pixel format a stream or buffer is declared with.
///
/// The numeric values match the graphics HAL definitions so they can be carried
/// across the client boundary unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum HalPixelFormat {
    Rgba8888 = 0x1,
    Rgbx8888 = 0x2,
    Bgra8888 = 0x5,
    YCrCb420Sp = 0x11,
    YCbCr422I = 0x14,
    Raw16 = 0x20,
    Blob = 0x21,
    ImplementationDefined = 0x22,
    YCbCr420_888 = 0x23,
    Y8 = 0x2020_3859,
    Y16 = 0x2036_3159,
    Yv12 = 0x3231_5659,
}

impl HalPixelFormat {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x1 => HalPixelFormat::Rgba8888,
            0x2 => HalPixelFormat::Rgbx8888,
            0x5 => HalPixelFormat::Bgra8888,
            0x11 => HalPixelFormat::YCrCb420Sp,
            0x14 => HalPixelFormat::YCbCr422I,
            0x20 => HalPixelFormat::Raw16,
            0x21 => HalPixelFormat::Blob,
            0x22 => HalPixelFormat::ImplementationDefined,
            0x23 => HalPixelFormat::YCbCr420_888,
            0x2020_3859 => HalPixelFormat::Y8,
            0x2036_3159 => HalPixelFormat::Y16,
            0x3231_5659 => HalPixelFormat::Yv12,
            _ => return None,
        })
    }

    /// Transport formats a buffer declared with this HAL format may be backed by.
    pub fn compatible_formats(self) -> &'static [FourCC] {
        match self {
            HalPixelFormat::Rgba8888 => &[FourCC::ABGR8888],
            HalPixelFormat::Rgbx8888 => &[FourCC::XBGR8888, FourCC::ABGR8888],
            HalPixelFormat::Bgra8888 => &[FourCC::ARGB8888],
            HalPixelFormat::YCrCb420Sp => &[FourCC::NV21],
            HalPixelFormat::YCbCr422I => &[FourCC::YUYV],
            HalPixelFormat::Raw16 | HalPixelFormat::Y16 => &[FourCC::R16],
            HalPixelFormat::Blob | HalPixelFormat::Y8 => &[FourCC::R8],
            HalPixelFormat::Yv12 => &[FourCC::YV12],
            HalPixelFormat::YCbCr420_888 => {
                &[FourCC::NV12, FourCC::NV21, FourCC::YU12, FourCC::YV12]
            }
            // The allocator picks the layout; anything it can produce for a
            // camera stream is acceptable.
            HalPixelFormat::ImplementationDefined => &[
                FourCC::NV12,
                FourCC::NV21,
                FourCC::YU12,
                FourCC::XBGR8888,
                FourCC::ABGR8888,
            ],
        }
    }

    pub fn is_compatible(self, drm_format: FourCC) -> bool {
        self.compatible_formats().contains(&drm_format)
    }

    /// Fails with `EINVAL` when `drm_format` cannot back a buffer of this HAL format.
    pub fn check_compatible(self, drm_format: FourCC) -> Result<(), Error> {
        if self.is_compatible(drm_format) {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "HAL pixel format {} cannot be backed by {}",
                self, drm_format
            )))
        }
    }
}

impl fmt::Display for HalPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            HalPixelFormat::Rgba8888 => "RGBA_8888",
            HalPixelFormat::Rgbx8888 => "RGBX_8888",
            HalPixelFormat::Bgra8888 => "BGRA_8888",
            HalPixelFormat::YCrCb420Sp => "YCrCb_420_SP",
            HalPixelFormat::YCbCr422I => "YCbCr_422_I",
            HalPixelFormat::Raw16 => "RAW16",
            HalPixelFormat::Blob => "BLOB",
            HalPixelFormat::ImplementationDefined => "IMPLEMENTATION_DEFINED",
            HalPixelFormat::YCbCr420_888 => "YCbCr_420_888",
            HalPixelFormat::Y8 => "Y8",
            HalPixelFormat::Y16 => "Y16",
            HalPixelFormat::Yv12 => "YV12",
        };
        f.write_str(name)
    }
}
