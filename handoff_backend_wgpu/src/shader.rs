// Copyright 2026 the Handoff Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The one WGSL module behind every render pipeline this backend builds.
//!
//! A four-vertex strip covers the viewport. The viewport is set to the
//! destination rectangle, and `params.src` holds the normalized source
//! rectangle, so the same vertex stage serves blits, composites, and fills.

use bytemuck::{Pod, Zeroable};

pub(crate) const QUAD_WGSL: &str = r#"
struct Params {
    src: vec4<f32>,
    color: vec4<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var src_tex: texture_2d<f32>;
@group(0) @binding(2) var src_smp: sampler;

struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) idx: u32) -> VsOut {
    let corner = vec2<f32>(f32(idx & 1u), f32(idx >> 1u));
    var out: VsOut;
    out.pos = vec4<f32>(corner.x * 2.0 - 1.0, 1.0 - corner.y * 2.0, 0.0, 1.0);
    out.uv = mix(params.src.xy, params.src.zw, corner);
    return out;
}

@fragment
fn fs_sample(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(src_tex, src_smp, in.uv);
}

@fragment
fn fs_fill(in: VsOut) -> @location(0) vec4<f32> {
    return params.color;
}
"#;

/// Uniform block shared by both fragment entry points.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct QuadParams {
    /// Source rectangle as `(u0, v0, u1, v1)`.
    pub(crate) src: [f32; 4],
    /// Fill color, already in the target's encoding.
    pub(crate) color: [f32; 4],
}

impl QuadParams {
    pub(crate) fn sample(src: [f32; 4]) -> Self {
        Self {
            src,
            color: [0.0; 4],
        }
    }

    pub(crate) fn fill(color: [f32; 4]) -> Self {
        Self {
            src: [0.0, 0.0, 1.0, 1.0],
            color,
        }
    }
}
