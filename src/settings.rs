//! Per-camera volumetric fog configuration.
//! 每个相机的体积雾配置
//!
//! [`VolumetricFogSettings`] is the resolved set of tunables the fog pipeline reads each
//! frame. It is attached to a 3D camera, clamped into its valid ranges during extraction,
//! and injected into every render-world system that needs it. There is no global lookup.
//!
//! ```text
//! [Camera3d + VolumetricFogSettings] --extract/sanitize--> [ExtractedVolumetricFog]
//!                                                               ↓
//!                      light aggregation, uniforms, targets, frame plan, graph node
//! ```

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "format-json")]
use crate::error::FogProfileError;

/// 最大雾距离
/// Upper bound of [`VolumetricFogSettings::distance`]
pub const MAX_FOG_DISTANCE: f32 = 512.0;
/// 衰减距离下限, 防止除零
/// Lower bound of [`VolumetricFogSettings::attenuation_distance`]
pub const MIN_ATTENUATION_DISTANCE: f32 = 0.05;
/// 步进次数范围
/// Valid raymarch step range
pub const MIN_STEPS: u32 = 8;
pub const MAX_STEPS: u32 = 256;
/// 模糊迭代次数范围
/// Valid blur iteration range
pub const MIN_BLUR_ITERATIONS: u32 = 1;
pub const MAX_BLUR_ITERATIONS: u32 = 4;
/// 散射系数上限 (主光源与附加光源共用)
/// Upper bound of scattering coefficients (main and additional lights)
pub const MAX_SCATTERING: f32 = 16.0;

/// 雾效在渲染图中的插入位置
/// Where the fog pass is inserted into the 3D render graph
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Reflect, Serialize, Deserialize,
)]
pub enum FogRenderPassEvent {
    /// 不透明物体之后, 透射物体之前
    /// After opaque geometry, before transmissive geometry
    AfterRenderingOpaques,
    /// 透明物体之前
    /// Before transparent geometry
    BeforeRenderingTransparents,
    /// 后处理之前 (默认)
    /// After the main pass, before bloom and the rest of post-processing
    #[default]
    BeforeRenderingPostProcessing,
    /// 后处理之后
    /// After tonemapping, at the end of post-processing
    AfterRenderingPostProcessing,
}

impl FogRenderPassEvent {
    pub const ALL: [FogRenderPassEvent; 4] = [
        FogRenderPassEvent::AfterRenderingOpaques,
        FogRenderPassEvent::BeforeRenderingTransparents,
        FogRenderPassEvent::BeforeRenderingPostProcessing,
        FogRenderPassEvent::AfterRenderingPostProcessing,
    ];
}

/// 体积雾设置
/// Volumetric fog settings for one camera
///
/// Ranged values are clamped by [`VolumetricFogSettings::sanitized`] before the render
/// world sees them, so out-of-range values written here never reach the GPU.
///
/// # Activity
/// The pipeline only runs when [`is_active`](Self::is_active) holds: `enabled`, a positive
/// `distance` and a positive `density`. A camera with `density = 0` declares no stages and
/// allocates no targets even if `enabled` is set.
///
/// ```rust
/// # use bevy_volumetric_fog::prelude::*;
/// let settings = VolumetricFogSettings {
///     enabled: true,
///     density: 0.0,
///     ..Default::default()
/// };
/// assert!(!settings.is_active());
/// ```
#[derive(Component, Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Component, Default)]
#[serde(default)]
#[require(Camera3d)]
pub struct VolumetricFogSettings {
    /// 是否启用
    /// Master switch for this camera
    pub enabled: bool,

    /// 雾的最大距离 [0, 512]
    /// Maximum raymarch distance in world units
    pub distance: f32,

    /// 是否启用地面裁剪
    /// Clip fog below `ground_height`
    pub enable_ground: bool,

    /// 地面高度
    /// Ground plane height, ignored unless `enable_ground` is set
    pub ground_height: f32,

    /// 雾的基准高度
    /// Height at which fog is at full density
    pub base_height: f32,

    /// 雾的最大高度
    /// Height above which fog density falls to zero
    pub maximum_height: f32,

    /// 密度 [0, 1]
    /// Fog density
    pub density: f32,

    /// 衰减距离, 转换为吸收系数 = 1 / attenuation_distance
    /// Attenuation distance, converted to absorption as `1 / attenuation_distance`
    pub attenuation_distance: f32,

    /// 是否启用环境探针贡献
    /// Sample ambient light probes along each ray
    pub enable_apv_contribution: bool,

    /// 环境探针贡献权重 [0, 1]
    /// Weight of the ambient probe contribution
    pub apv_contribution_weight: f32,

    /// 雾的颜色
    /// Tint multiplied into the accumulated in-scattering
    pub tint: Color,

    /// 最大步进次数 [8, 256]
    pub max_steps: u32,

    /// 模糊迭代次数 [1, 4]
    /// Number of horizontal+vertical blur pairs
    pub blur_iterations: u32,

    /// 主光源贡献
    pub enable_main_light_contribution: bool,

    /// 附加光源贡献
    pub enable_additional_lights_contribution: bool,

    /// 主光源各向异性 [-1, 1]
    /// Henyey-Greenstein anisotropy for the main light
    pub anisotropy: f32,

    /// 主光源散射系数 [0, 16]
    /// Scattering coefficient for the main light
    pub scattering: f32,

    /// 渲染图插入位置
    pub render_pass_event: FogRenderPassEvent,
}

impl Default for VolumetricFogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            distance: 64.0,
            enable_ground: false,
            ground_height: 0.0,
            base_height: 0.0,
            maximum_height: 50.0,
            density: 0.2,
            attenuation_distance: 128.0,
            enable_apv_contribution: false,
            apv_contribution_weight: 1.0,
            tint: Color::WHITE,
            max_steps: 128,
            blur_iterations: 2,
            enable_main_light_contribution: true,
            enable_additional_lights_contribution: true,
            anisotropy: 0.4,
            scattering: 0.15,
            render_pass_event: FogRenderPassEvent::default(),
        }
    }
}

impl VolumetricFogSettings {
    /// Whether the fog pipeline should run for this configuration.
    pub fn is_active(&self) -> bool {
        self.enabled && self.distance > 0.0 && self.density > 0.0
    }

    /// Absorption coefficient bound to the shader.
    pub fn absorption(&self) -> f32 {
        1.0 / self.attenuation_distance.max(MIN_ATTENUATION_DISTANCE)
    }

    /// 返回所有范围参数都被钳制后的副本
    /// Returns a copy with every ranged parameter clamped into its valid range
    pub fn sanitized(&self) -> Self {
        Self {
            distance: self.distance.clamp(0.0, MAX_FOG_DISTANCE),
            density: self.density.clamp(0.0, 1.0),
            attenuation_distance: self.attenuation_distance.max(MIN_ATTENUATION_DISTANCE),
            apv_contribution_weight: self.apv_contribution_weight.clamp(0.0, 1.0),
            max_steps: self.max_steps.clamp(MIN_STEPS, MAX_STEPS),
            blur_iterations: self
                .blur_iterations
                .clamp(MIN_BLUR_ITERATIONS, MAX_BLUR_ITERATIONS),
            anisotropy: self.anisotropy.clamp(-1.0, 1.0),
            scattering: self.scattering.clamp(0.0, MAX_SCATTERING),
            ..self.clone()
        }
    }

    /// 从 JSON 读取雾效配置
    /// Loads a fog profile from JSON. Missing fields take their defaults.
    #[cfg(feature = "format-json")]
    pub fn from_json(json: &str) -> Result<Self, FogProfileError> {
        serde_json::from_str(json).map_err(|e| FogProfileError::DeserializationFailed(e.to_string()))
    }

    /// 将雾效配置写为 JSON
    /// Writes this fog profile as pretty-printed JSON
    #[cfg(feature = "format-json")]
    pub fn to_json(&self) -> Result<String, FogProfileError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FogProfileError::SerializationFailed(e.to_string()))
    }
}
