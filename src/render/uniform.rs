use bevy::prelude::*;
use bevy::render::render_resource::{DynamicUniformBuffer, ShaderType};
use bytemuck::{Pod, Zeroable};

use crate::light::{FogLightParams, LIGHT_SLOTS, MAX_ADDITIONAL_LIGHTS};
use crate::settings::VolumetricFogSettings;

/// 时间抖动周期
/// Period of the frame index used for temporal dithering
pub const FRAME_INDEX_PERIOD: u32 = 64;
/// 每个光源数组打包后的 vec4 数量
/// Number of `vec4`s each per-light array is packed into
pub const PACKED_LIGHT_VEC4S: usize = LIGHT_SLOTS.div_ceil(4);

/// 地面关闭时绑定的高度, 着色器视为 "不裁剪"
/// Ground height bound when ground clipping is off
pub const NO_GROUND_HEIGHT: f32 = f32::MIN;

/// 体积雾 uniform, 字段名即着色器接口
/// Fog parameters bound to the render stage. Field names are the shader contract.
///
/// Per-light arrays are packed four floats per `vec4` to satisfy uniform array stride.
/// Slot `i` lives in `array[i / 4][i % 4]`.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, ShaderType)]
#[repr(C)]
pub struct VolumetricFogUniform {
    pub tint: Vec4,
    pub frame_count: u32,
    pub additional_lights_count: u32,
    pub max_steps: u32,
    pub distance: f32,
    pub base_height: f32,
    pub maximum_height: f32,
    pub ground_height: f32,
    pub density: f32,
    pub absorption: f32,
    pub apv_contribution_weight: f32,
    pub _padding: Vec2, // 16 byte alignment of the arrays / 数组 16 字节对齐
    pub anisotropies: [Vec4; PACKED_LIGHT_VEC4S],
    pub scatterings: [Vec4; PACKED_LIGHT_VEC4S],
    pub radii_sq: [Vec4; PACKED_LIGHT_VEC4S],
}

impl VolumetricFogUniform {
    pub fn new(
        settings: &VolumetricFogSettings,
        lights: &FogLightParams,
        additional_lights_count: usize,
        frame_count: u32,
    ) -> Self {
        Self {
            tint: settings.tint.to_linear().to_vec4(),
            frame_count: frame_count % FRAME_INDEX_PERIOD,
            additional_lights_count: additional_lights_count.min(MAX_ADDITIONAL_LIGHTS) as u32,
            max_steps: settings.max_steps,
            distance: settings.distance,
            base_height: settings.base_height,
            maximum_height: settings.maximum_height,
            ground_height: if settings.enable_ground {
                settings.ground_height
            } else {
                NO_GROUND_HEIGHT
            },
            density: settings.density,
            absorption: settings.absorption(),
            apv_contribution_weight: if settings.enable_apv_contribution {
                settings.apv_contribution_weight
            } else {
                0.0
            },
            _padding: Vec2::ZERO,
            anisotropies: pack(lights.anisotropies()),
            scatterings: pack(lights.scatterings()),
            radii_sq: pack(lights.radii_sq()),
        }
    }

    /// Unpacks slot `index` of a packed array.
    pub fn slot(array: &[Vec4; PACKED_LIGHT_VEC4S], index: usize) -> f32 {
        array[index / 4][index % 4]
    }
}

fn pack(values: &[f32]) -> [Vec4; PACKED_LIGHT_VEC4S] {
    let mut packed = [Vec4::ZERO; PACKED_LIGHT_VEC4S];
    for (i, value) in values.iter().enumerate().take(PACKED_LIGHT_VEC4S * 4) {
        packed[i / 4][i % 4] = *value;
    }
    packed
}

/// 所有视图共享的动态 uniform 缓冲区
/// Dynamic uniform buffer holding one [`VolumetricFogUniform`] per fog view
#[derive(Resource, Default, Deref, DerefMut)]
pub struct FogUniformBuffer(pub DynamicUniformBuffer<VolumetricFogUniform>);

/// 视图在 [`FogUniformBuffer`] 中的偏移
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFogUniformOffset(pub u32);
