use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResource;
use serde::{Deserialize, Serialize};

use crate::settings::{FogRenderPassEvent, VolumetricFogSettings};

/// 相机类型
/// Role of a camera, used to keep fog out of cameras where it is meaningless
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Reflect, Serialize, Deserialize,
)]
pub enum FogCameraKind {
    #[default]
    Game,
    /// 编辑器场景视图
    SceneView,
    /// 材质/资源预览相机
    /// Asset or material preview camera
    Preview,
    /// 反射探针相机
    /// Camera rendering into a reflection probe; fog here would feed back into itself
    Reflection,
}

impl FogCameraKind {
    pub fn is_eligible(self) -> bool {
        !matches!(self, FogCameraKind::Preview | FogCameraKind::Reflection)
    }
}

/// 相机的后处理属性
/// Per-camera post-processing properties. Cameras without it are treated as
/// game cameras with post-processing on.
#[derive(Component, Debug, Clone, Copy, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Component, Default)]
pub struct FogCamera {
    pub kind: FogCameraKind,
    pub post_processing: bool,
}

impl FogCamera {
    /// Camera-level post-processing switch and kind check.
    pub fn allows_post_processing(&self) -> bool {
        self.post_processing && self.kind.is_eligible()
    }
}

impl Default for FogCamera {
    fn default() -> Self {
        Self {
            kind: FogCameraKind::Game,
            post_processing: true,
        }
    }
}

/// 全局体积雾功能开关
/// Global switches of the fog feature
#[derive(Resource, Debug, Clone, Copy, PartialEq, Eq, Reflect, ExtractResource)]
#[reflect(Resource, Default)]
pub struct VolumetricFogFeature {
    /// 功能是否激活
    pub active: bool,
    /// 全局后处理开关
    /// Global post-processing switch, shared with the screen-space reflection pass
    pub post_processing: bool,
}

impl Default for VolumetricFogFeature {
    fn default() -> Self {
        Self {
            active: true,
            post_processing: true,
        }
    }
}

/// 本帧是否插入雾效管线的决定
/// Per-camera, per-frame decision to insert the fog pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FogInsertion {
    pub event: FogRenderPassEvent,
}

/// 多重采样下的实际插入位置
/// Insertion point actually used for a camera with `msaa_samples` samples
///
/// Before the main pass ends, later phases still draw into the multisampled texture and
/// resolve it over the composite. Those events move to `BeforeRenderingPostProcessing`
/// when MSAA is on.
pub fn resolve_event(event: FogRenderPassEvent, msaa_samples: u32) -> FogRenderPassEvent {
    match event {
        FogRenderPassEvent::AfterRenderingOpaques
        | FogRenderPassEvent::BeforeRenderingTransparents
            if msaa_samples > 1 =>
        {
            FogRenderPassEvent::BeforeRenderingPostProcessing
        }
        event => event,
    }
}

/// Post-processing and camera-kind checks shared by every pass of this crate.
pub fn post_processing_allowed(feature: &VolumetricFogFeature, camera: &FogCamera) -> bool {
    feature.post_processing && camera.allows_post_processing()
}

/// 决定是否为该相机插入雾效管线
/// Decides whether the fog pipeline runs for one camera this frame
///
/// Returns `None` for a static per-frame skip: nothing is allocated and no stages are
/// declared for that camera.
pub fn decide_insertion(
    feature: &VolumetricFogFeature,
    camera: &FogCamera,
    settings: &VolumetricFogSettings,
) -> Option<FogInsertion> {
    if !feature.active || !post_processing_allowed(feature, camera) || !settings.is_active() {
        return None;
    }

    Some(FogInsertion {
        event: settings.render_pass_event,
    })
}
