// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GPU round trips. Every test is skipped when no adapter is available.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use handoff_backend_wgpu::WgpuDevice;
use handoff_core::bridge::{FlushOutcome, LayerBridge, SoftwareLayer};
use handoff_core::config::HandoffConfig;
use handoff_core::device::{Device, TextureDesc, TextureUsage};
use handoff_core::format::{Color, PixelFormat, PixelLayout};
use handoff_core::geometry::{PhysicalSize, PixelRect};
use handoff_core::resource::pipeline::{CompositeMode, PipelineKey};
use kurbo::Size;

fn device() -> Option<Arc<WgpuDevice>> {
    match WgpuDevice::request() {
        Ok(device) => Some(Arc::new(device)),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

fn color_texture(device: &WgpuDevice, w: u32, h: u32) -> handoff_core::device::TextureId {
    device
        .create_texture(&TextureDesc::color(
            PhysicalSize::new(w, h),
            PixelFormat::RgbaPre,
        ))
        .unwrap()
}

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];
const WHITE: [u8; 4] = [255, 255, 255, 255];

#[test]
fn clear_then_fill_reads_back() {
    let Some(device) = device() else { return };
    let tex = color_texture(&device, 4, 4);
    device.clear(tex, Color::new(1.0, 0.0, 0.0, 1.0)).unwrap();
    device
        .fill_rect(tex, PixelRect::new(2, 0, 2, 4), Color::new(0.0, 0.0, 1.0, 1.0))
        .unwrap();

    let px = device
        .read_pixels(tex, PixelRect::new(0, 0, 4, 4))
        .unwrap();
    assert_eq!(px.len(), 64);
    for (k, p) in px.chunks(4).enumerate() {
        let expected = if k % 4 < 2 { RED } else { BLUE };
        assert_eq!(p, expected, "pixel {k}");
    }
}

#[test]
fn strided_upload_lands_in_region() {
    let Some(device) = device() else { return };
    let tex = color_texture(&device, 4, 4);
    device.clear(tex, Color::BLACK).unwrap();

    // Two rows of two white pixels, padded to a 16-byte stride.
    let mut src = vec![0_u8; 32];
    for row in 0..2 {
        src[row * 16..row * 16 + 8].copy_from_slice(&[255; 8]);
    }
    let layout = PixelLayout {
        stride: 16,
        origin: (0, 0),
    };
    device
        .write_texture(tex, PixelRect::new(1, 1, 2, 2), &src, layout)
        .unwrap();

    let px = device.read_pixels(tex, PixelRect::new(1, 1, 2, 2)).unwrap();
    assert!(px.chunks(4).all(|p| p == WHITE));
    let corner = device.read_pixels(tex, PixelRect::new(0, 0, 1, 1)).unwrap();
    assert_eq!(corner, [0, 0, 0, 255]);
}

#[test]
fn scaled_blit_uses_nearest_samples() {
    let Some(device) = device() else { return };
    let src = color_texture(&device, 2, 1);
    let pixels = [RED, GREEN].concat();
    device
        .write_texture(
            src,
            PixelRect::new(0, 0, 2, 1),
            &pixels,
            PixelLayout::packed(PixelFormat::RgbaPre, 2),
        )
        .unwrap();

    let dst = color_texture(&device, 4, 2);
    device
        .blit(src, PixelRect::new(0, 0, 2, 1), dst, PixelRect::new(0, 0, 4, 2))
        .unwrap();
    let px = device.read_pixels(dst, PixelRect::new(0, 0, 4, 2)).unwrap();
    for (k, p) in px.chunks(4).enumerate() {
        let expected = if k % 4 < 2 { RED } else { GREEN };
        assert_eq!(p, expected, "pixel {k}");
    }
}

#[test]
fn multisampled_source_is_resolved() {
    let Some(device) = device() else { return };
    let msaa = device
        .create_texture(&TextureDesc {
            size: PhysicalSize::new(4, 4),
            format: PixelFormat::RgbaPre,
            usage: TextureUsage::MsaaColor { samples: 4 },
            mipmapped: false,
        })
        .unwrap();
    device.clear(msaa, Color::new(0.0, 1.0, 0.0, 1.0)).unwrap();
    let dst = color_texture(&device, 4, 4);
    device
        .blit(msaa, PixelRect::new(0, 0, 4, 4), dst, PixelRect::new(0, 0, 4, 4))
        .unwrap();
    let px = device.read_pixels(dst, PixelRect::new(0, 0, 4, 4)).unwrap();
    assert!(px.chunks(4).all(|p| p == GREEN));
}

#[test]
fn pipelines_and_buffers_are_created() {
    let Some(device) = device() else { return };
    let key = PipelineKey::new(CompositeMode::SrcOver, PixelFormat::BgraPre);
    let pipeline = device.create_pipeline(&key).unwrap();
    device.release_pipeline(pipeline);

    let buffer = device.create_buffer(256).unwrap();
    device.write_buffer(buffer, 0, &[1, 2, 3, 4, 5, 6]).unwrap();
    assert!(device.write_buffer(buffer, 254, &[0; 4]).is_err());
    device.release_buffer(buffer);
}

#[test]
fn submit_callback_runs_after_poll() {
    let Some(device) = device() else { return };
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    device.submit(Box::new(move || flag.store(true, Ordering::Release)));
    device.poll(true);
    assert!(done.load(Ordering::Acquire));
    assert_eq!(device.submissions(), 1);
}

#[test]
fn bridge_presents_a_gpu_frame() {
    let Some(device) = device() else { return };
    let layer = Arc::new(parking_lot::Mutex::new(SoftwareLayer::new(
        device.clone(),
        PhysicalSize::new(8, 8),
    )));
    let bridge = LayerBridge::new(device.clone(), Box::new(layer.clone()), &HandoffConfig::default())
        .unwrap();

    bridge
        .paint(Size::new(8.0, 8.0), |frame| {
            frame
                .surface()
                .clear(Color::new(0.0, 0.0, 1.0, 1.0))
                .unwrap();
        })
        .unwrap();
    device.poll(true);
    assert_eq!(bridge.flush(), FlushOutcome::Presented);

    let px = layer.lock().pixels().unwrap();
    assert!(px.chunks(4).all(|p| p == BLUE));
    bridge.tear_down();
}
