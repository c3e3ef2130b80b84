// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Zero Shutter Lag Tests
//
// TESTING LAYERS:
//
// Layer 1 (Unit Tests - No hardware required):
//   - test_hidden_stream_round_trip: hidden stream configured at the vendor
//     only, ring outputs stripped from results, still capture reprocesses the
//     newest frame and its buffer goes back to the pool
//   - test_still_capture_before_any_frame: captured normally with a ring
//     output
//   - test_no_still_stream: nothing attached without a still output
//   - test_disabled_by_config: no pool allocated
//
// The fake camera advertises private reprocessing at 64x48; pool buffers
// come from the file-backed test mapper.
//
// RUN LAYER 1:
//   cargo test --test zsl

mod common;

use camhal::{
    adapter::{AdapterConfig, CameraHalAdapter, CameraModuleClient, CameraModuleOps},
    camera3::{CameraFacing, CaptureRequest, StreamBufferRef, StreamConfiguration, StreamSpec},
    device::{
        CameraDeviceClient, ZslSelection, ZSL_BUFFER_ID_BASE, ZSL_RING_SIZE, ZSL_STREAM_ID,
    },
    format::HalPixelFormat,
    mapper::BufferMapper,
    metadata::{serialize, tags, CameraMetadata},
    stream::StreamType,
};
use common::*;
use serial_test::serial;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

const PREVIEW: u64 = 1;
const STILL: u64 = 2;
const STILL_BUFFER: u64 = 20;

struct Rig {
    module: Arc<FakeModule>,
    mapper: Arc<FileMapper>,
    adapter: CameraHalAdapter,
    client: CameraModuleClient,
}

fn rig(zsl_selection: Option<ZslSelection>) -> Rig {
    let module = FakeModule::new("fake", vec![FakeCamera::new(CameraFacing::Back).with_zsl()]);
    let mapper = Arc::new(FileMapper::default());
    let config = AdapterConfig {
        zsl_selection,
        ..counting_config(Arc::new(AtomicU32::new(0)))
    };
    let (adapter, client) = start_adapter_with(
        vec![module.clone()],
        Vec::new(),
        Some(mapper.clone() as Arc<dyn BufferMapper>),
        config,
    );
    Rig {
        module,
        mapper,
        adapter,
        client,
    }
}

fn stream(id: u64, format: HalPixelFormat) -> StreamSpec {
    StreamSpec {
        id,
        stream_type: StreamType::Output,
        width: 64,
        height: 48,
        format,
        usage: 0,
        data_space: 0,
        rotation: 0,
        crop_rotate_scale_degrees: 0,
    }
}

fn open(
    client: &CameraModuleClient,
    streams: Vec<StreamSpec>,
) -> (CameraDeviceClient, Arc<CaptureRecorder>) {
    let device = client.open_device(0).unwrap();
    let recorder = CaptureRecorder::new();
    device.initialize(recorder.clone()).unwrap();
    let configured = device
        .configure_streams(StreamConfiguration {
            streams,
            operation_mode: 0,
        })
        .unwrap();
    assert!(configured.iter().all(|s| s.id != ZSL_STREAM_ID));
    (device, recorder)
}

fn preview_and_still() -> Vec<StreamSpec> {
    vec![
        stream(PREVIEW, HalPixelFormat::ImplementationDefined),
        stream(STILL, HalPixelFormat::Blob),
    ]
}

fn output(stream_id: u64, buffer_id: u64) -> StreamBufferRef {
    StreamBufferRef {
        stream_id,
        buffer_id,
        ..StreamBufferRef::default()
    }
}

fn preview(device: &CameraDeviceClient, buffer: &TestBuffer, buffer_id: u64) -> u32 {
    device
        .register_buffer(buffer.registration(buffer_id))
        .unwrap();
    device
        .process_capture_request(CaptureRequest {
            output_buffers: vec![output(PREVIEW, buffer_id)],
            ..CaptureRequest::default()
        })
        .unwrap()
}

fn still(device: &CameraDeviceClient, buffer: &TestBuffer) -> u32 {
    device
        .register_buffer(buffer.registration_as(STILL_BUFFER, HalPixelFormat::Blob))
        .unwrap();
    let mut settings = CameraMetadata::new();
    settings
        .update(tags::ANDROID_CONTROL_ENABLE_ZSL, &[1u8])
        .unwrap();
    settings
        .update(
            tags::ANDROID_CONTROL_CAPTURE_INTENT,
            &[tags::ANDROID_CONTROL_CAPTURE_INTENT_STILL_CAPTURE],
        )
        .unwrap();
    device
        .process_capture_request(CaptureRequest {
            settings: serialize(&settings).unwrap(),
            input_buffer: None,
            output_buffers: vec![output(STILL, STILL_BUFFER)],
        })
        .unwrap()
}

#[test]
#[serial]
fn test_hidden_stream_round_trip() {
    let rig = rig(Some(ZslSelection::LastSubmitted));
    let (device, recorder) = open(&rig.client, preview_and_still());
    let log = rig.module.device_log(0);

    let configured = log.configured();
    assert_eq!(configured.len(), 3);
    let hidden = configured.iter().find(|s| s.id == ZSL_STREAM_ID).unwrap();
    assert_eq!(hidden.stream_type, StreamType::Bidirectional);
    assert_eq!(hidden.format, HalPixelFormat::ImplementationDefined);
    assert_eq!((hidden.width, hidden.height), (64, 48));

    let session = device.session().clone();
    let zsl = session.zsl().unwrap().clone();
    assert!(zsl.is_enabled());
    let pool_size = ZSL_RING_SIZE + usize::from(ZSL_PIPELINE_DEPTH);
    assert_eq!(zsl.pool_size(), pool_size);
    assert_eq!(
        rig.mapper.allocations.load(Ordering::SeqCst) as usize,
        pool_size
    );

    let buffers = [TestBuffer::new(64, 48), TestBuffer::new(64, 48)];
    for (buffer, id) in buffers.iter().zip(10u64..) {
        preview(&device, buffer, id);
    }
    assert!(recorder.wait_results(2));

    let submitted = log.requests();
    for (request, id) in submitted.iter().zip(10u64..) {
        assert_eq!(request.input_buffer, None);
        assert_eq!(request.output_buffers.len(), 2);
        assert_eq!(request.output_buffers[0], id);
        assert!(request.output_buffers[1] >= ZSL_BUFFER_ID_BASE);
    }
    for (result, id) in recorder.take_results().iter().zip(10u64..) {
        assert_eq!(result.output_buffers.len(), 1);
        assert_eq!(result.output_buffers[0].buffer_id, id);
        assert_eq!(result.output_buffers[0].stream_id, PREVIEW);
    }
    assert!(eventually(|| zsl.ready_frames() == 2));

    let jpeg = TestBuffer::new(64, 48);
    let frame_number = still(&device, &jpeg);
    assert!(recorder.wait_results(1));

    let reprocess = log.requests().pop().unwrap();
    assert_eq!(reprocess.frame_number, frame_number);
    // The newest preview frame is the input; no ring output this time.
    assert_eq!(reprocess.input_buffer, Some(submitted[1].output_buffers[1]));
    assert_eq!(reprocess.output_buffers, vec![STILL_BUFFER]);

    let results = recorder.take_results();
    assert_eq!(results[0].frame_number, frame_number);
    assert!(results[0].input_buffer.is_none());
    assert_eq!(results[0].output_buffers.len(), 1);
    assert_eq!(results[0].output_buffers[0].buffer_id, STILL_BUFFER);

    // Frame 0 still holds its buffer, frame 1's came back from the
    // reprocessing.
    assert!(eventually(|| zsl.available_buffers() == pool_size - 1));
    assert_eq!(zsl.ready_frames(), 1);

    device.close().unwrap();
    assert!(!zsl.is_enabled());
    rig.adapter.shutdown();
}

#[test]
#[serial]
fn test_still_capture_before_any_frame() {
    let rig = rig(Some(ZslSelection::default()));
    let (device, recorder) = open(&rig.client, preview_and_still());

    let jpeg = TestBuffer::new(64, 48);
    still(&device, &jpeg);
    assert!(recorder.wait_results(1));

    let submitted = rig.module.device_log(0).requests();
    assert_eq!(submitted[0].input_buffer, None);
    assert_eq!(submitted[0].output_buffers.len(), 2);
    assert_eq!(submitted[0].output_buffers[0], STILL_BUFFER);
    assert!(submitted[0].output_buffers[1] >= ZSL_BUFFER_ID_BASE);

    let results = recorder.take_results();
    assert_eq!(results[0].output_buffers.len(), 1);
    assert_eq!(results[0].output_buffers[0].buffer_id, STILL_BUFFER);

    device.close().unwrap();
    rig.adapter.shutdown();
}

#[test]
#[serial]
fn test_no_still_stream() {
    let rig = rig(Some(ZslSelection::default()));
    let (device, recorder) = open(
        &rig.client,
        vec![stream(PREVIEW, HalPixelFormat::ImplementationDefined)],
    );
    let log = rig.module.device_log(0);
    assert_eq!(log.configured().len(), 1);

    let zsl = device.session().zsl().unwrap().clone();
    assert!(!zsl.is_enabled());

    let buffer = TestBuffer::new(64, 48);
    preview(&device, &buffer, 10);
    assert!(recorder.wait_results(1));
    assert_eq!(log.requests()[0].output_buffers, vec![10]);
    assert_eq!(zsl.available_buffers(), zsl.pool_size());

    device.close().unwrap();
    rig.adapter.shutdown();
}

#[test]
#[serial]
fn test_disabled_by_config() {
    let rig = rig(None);
    let (device, recorder) = open(&rig.client, preview_and_still());
    assert!(device.session().zsl().is_none());
    assert_eq!(rig.mapper.allocations.load(Ordering::SeqCst), 0);
    assert_eq!(rig.module.device_log(0).configured().len(), 2);

    let jpeg = TestBuffer::new(64, 48);
    still(&device, &jpeg);
    assert!(recorder.wait_results(1));
    assert_eq!(
        rig.module.device_log(0).requests()[0].output_buffers,
        vec![STILL_BUFFER]
    );

    device.close().unwrap();
    rig.adapter.shutdown();
}
