// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Well-known metadata tags inspected by the adapter.
//!
//! Tags are `section << 16 | index`. Sections at or above
//! [`VENDOR_SECTION_START`] belong to vendors.

pub const ANDROID_CONTROL_AE_MODE: u32 = 0x0001_0003;
pub const ANDROID_CONTROL_AF_MODE: u32 = 0x0001_0007;
pub const ANDROID_CONTROL_AWB_MODE: u32 = 0x0001_000B;
pub const ANDROID_CONTROL_CAPTURE_INTENT: u32 = 0x0001_000D;
pub const ANDROID_CONTROL_AE_STATE: u32 = 0x0001_001F;
pub const ANDROID_CONTROL_AF_STATE: u32 = 0x0001_0020;
pub const ANDROID_CONTROL_AWB_STATE: u32 = 0x0001_0022;
pub const ANDROID_CONTROL_ENABLE_ZSL: u32 = 0x0001_0029;
pub const ANDROID_FLASH_INFO_AVAILABLE: u32 = 0x0005_0000;
pub const ANDROID_LENS_FACING: u32 = 0x0008_0005;
pub const ANDROID_REQUEST_MAX_NUM_INPUT_STREAMS: u32 = 0x000C_0008;
pub const ANDROID_REQUEST_PIPELINE_MAX_DEPTH: u32 = 0x000C_000A;
pub const ANDROID_REQUEST_PARTIAL_RESULT_COUNT: u32 = 0x000C_000B;
pub const ANDROID_REQUEST_AVAILABLE_CAPABILITIES: u32 = 0x000C_000C;
pub const ANDROID_REQUEST_AVAILABLE_REQUEST_KEYS: u32 = 0x000C_000D;
pub const ANDROID_REQUEST_AVAILABLE_RESULT_KEYS: u32 = 0x000C_000E;
pub const ANDROID_REQUEST_AVAILABLE_CHARACTERISTICS_KEYS: u32 = 0x000C_000F;
pub const ANDROID_SCALER_AVAILABLE_STREAM_CONFIGURATIONS: u32 = 0x000D_000A;
pub const ANDROID_SENSOR_TIMESTAMP: u32 = 0x000E_0010;
pub const ANDROID_SENSOR_INFO_TIMESTAMP_SOURCE: u32 = 0x000F_0008;

pub const ANDROID_FLASH_INFO_AVAILABLE_TRUE: u8 = 1;

pub const ANDROID_CONTROL_CAPTURE_INTENT_STILL_CAPTURE: u8 = 2;
pub const ANDROID_CONTROL_CAPTURE_INTENT_ZERO_SHUTTER_LAG: u8 = 5;

/// `OFF` of the AE, AF and AWB mode enums.
pub const ANDROID_CONTROL_MODE_OFF: u8 = 0;
pub const ANDROID_CONTROL_AE_STATE_CONVERGED: u8 = 2;
pub const ANDROID_CONTROL_AE_STATE_LOCKED: u8 = 3;
pub const ANDROID_CONTROL_AE_STATE_FLASH_REQUIRED: u8 = 4;
pub const ANDROID_CONTROL_AF_STATE_PASSIVE_FOCUSED: u8 = 2;
pub const ANDROID_CONTROL_AF_STATE_FOCUSED_LOCKED: u8 = 4;
pub const ANDROID_CONTROL_AWB_STATE_CONVERGED: u8 = 2;
pub const ANDROID_CONTROL_AWB_STATE_LOCKED: u8 = 3;

pub const ANDROID_REQUEST_AVAILABLE_CAPABILITIES_PRIVATE_REPROCESSING: u8 = 4;
pub const ANDROID_SCALER_AVAILABLE_STREAM_CONFIGURATIONS_INPUT: i32 = 1;
pub const ANDROID_SENSOR_INFO_TIMESTAMP_SOURCE_REALTIME: u8 = 1;

/// First tag of the vendor tag space.
pub const VENDOR_SECTION_START: u32 = 0x8000_0000;

/// First tag handed out to reprocessing effects.
pub const REPROCESS_EFFECT_VENDOR_TAG_START: u32 = 0x8ffc_0000;

/// Section name reported for tags owned by the adapter itself.
pub const VENDOR_GOOGLE_SECTION_NAME: &str = "com.google";

pub fn is_vendor_tag(tag: u32) -> bool {
    tag >= VENDOR_SECTION_START
}
