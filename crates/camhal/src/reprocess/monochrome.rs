// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use super::{EffectTags, ReprocessEffect, VendorTagSpec};
use crate::{
    fourcc::FourCC,
    mapper::MappedImage,
    metadata::{CameraMetadata, EntryType},
    Error,
};

const NEUTRAL_CHROMA: u8 = 128;

/// Turns a YUV 4:2:0 image grey: luma is copied and chroma set to neutral.
///
/// Requested with the byte tag `com.google.effect.monochrome` set to non-zero.
/// Reports `com.google.effect.monochromeApplied` in the result.
#[derive(Debug, Default)]
pub struct MonochromeEffect;

impl MonochromeEffect {
    pub fn new() -> Self {
        MonochromeEffect
    }
}

fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<(), Error> {
    for row in 0..rows {
        let s = src
            .get(row * src_stride..row * src_stride + row_bytes)
            .ok_or_else(|| Error::invalid("source plane too small"))?;
        dst.get_mut(row * dst_stride..row * dst_stride + row_bytes)
            .ok_or_else(|| Error::invalid("destination plane too small"))?
            .copy_from_slice(s);
    }
    Ok(())
}

fn fill_rows(
    dst: &mut [u8],
    stride: usize,
    row_bytes: usize,
    rows: usize,
    value: u8,
) -> Result<(), Error> {
    for row in 0..rows {
        dst.get_mut(row * stride..row * stride + row_bytes)
            .ok_or_else(|| Error::invalid("destination plane too small"))?
            .fill(value);
    }
    Ok(())
}

impl ReprocessEffect for MonochromeEffect {
    fn name(&self) -> &str {
        "monochrome"
    }

    fn request_vendor_tags(&self) -> Vec<VendorTagSpec> {
        vec![VendorTagSpec {
            name: "com.google.effect.monochrome",
            entry_type: EntryType::Byte,
            default_value: vec![0],
        }]
    }

    fn result_vendor_tags(&self) -> Vec<VendorTagSpec> {
        vec![VendorTagSpec {
            name: "com.google.effect.monochromeApplied",
            entry_type: EntryType::Byte,
            default_value: vec![0],
        }]
    }

    fn reprocess(
        &self,
        tags: &EffectTags,
        settings: &CameraMetadata,
        input: &MappedImage,
        output: &mut MappedImage,
        result: &mut CameraMetadata,
    ) -> Result<(), Error> {
        let enabled = tags
            .request
            .first()
            .and_then(|tag| settings.find(*tag))
            .and_then(|e| e.first::<u8>())
            .is_some_and(|v| v != 0);

        let format = input.drm_format;
        if !format.is_yuv420() {
            return Err(Error::invalid(format!("monochrome needs YUV 4:2:0, got {}", format)));
        }
        if output.drm_format != format
            || output.width != input.width
            || output.height != input.height
        {
            return Err(Error::invalid("monochrome output differs from input"));
        }

        let width = input.width as usize;
        let height = input.height as usize;
        let plane = |image: &MappedImage, i: usize| -> Result<(usize, usize), Error> {
            match (image.offsets.get(i), image.strides.get(i)) {
                (Some(offset), Some(stride)) => Ok((*offset as usize, *stride as usize)),
                _ => Err(Error::invalid(format!("{} image lacks plane {}", format, i))),
            }
        };

        let (src_off, src_stride) = plane(input, 0)?;
        let (dst_off, dst_stride) = plane(&*output, 0)?;
        let src = input
            .data
            .get(src_off..)
            .ok_or_else(|| Error::invalid("luma offset out of range"))?;
        let dst = output
            .data
            .get_mut(dst_off..)
            .ok_or_else(|| Error::invalid("luma offset out of range"))?;
        copy_rows(src, src_stride, dst, dst_stride, width, height)?;

        let chroma_rows = (height + 1) / 2;
        let chroma_planes = if format == FourCC::NV12 || format == FourCC::NV21 {
            vec![(1, width)]
        } else {
            vec![(1, (width + 1) / 2), (2, (width + 1) / 2)]
        };
        for (index, row_bytes) in chroma_planes {
            let (off, stride) = plane(&*output, index)?;
            let dst = output
                .data
                .get_mut(off..)
                .ok_or_else(|| Error::invalid("chroma offset out of range"))?;
            if enabled {
                fill_rows(dst, stride, row_bytes, chroma_rows, NEUTRAL_CHROMA)?;
            } else {
                let (src_off, src_stride) = plane(input, index)?;
                let src = input
                    .data
                    .get(src_off..)
                    .ok_or_else(|| Error::invalid("chroma offset out of range"))?;
                copy_rows(src, src_stride, dst, stride, row_bytes, chroma_rows)?;
            }
        }

        if let Some(tag) = tags.result.first() {
            result.update(*tag, &[u8::from(enabled)])?;
        }
        Ok(())
    }
}
