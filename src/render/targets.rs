//! Intermediate render targets of the fog pipeline.
//! 雾效管线的中间渲染目标
//!
//! ```text
//! camera (w × h, camera format)
//!   ├─ downsampled depth   (w/2 × h/2, R32Float)
//!   ├─ fog  ─┐ ping-pong   (w/2 × h/2, Rgba16Float)
//!   ├─ blur ─┘             (w/2 × h/2, Rgba16Float)
//!   └─ composite           (w × h, camera format) → becomes the camera color
//! ```
//!
//! Half sizes use integer division, so odd dimensions truncate: 1025×769 plans
//! 512×384 half-resolution targets. Targets live for one frame. They are requested
//! from the engine [`TextureCache`] every frame and never kept by this crate.

use bevy::prelude::*;
use bevy::render::camera::ExtractedCamera;
use bevy::render::render_resource::{
    Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
};
use bevy::render::renderer::RenderDevice;
use bevy::render::texture::{CachedTexture, TextureCache};
use bevy::render::view::ViewTarget;

use super::extract::ExtractedVolumetricFog;

pub const DOWNSAMPLED_DEPTH_LABEL: &str = "volumetric_fog_downsampled_depth";
pub const FOG_LABEL: &str = "volumetric_fog";
pub const FOG_BLUR_LABEL: &str = "volumetric_fog_blur";
pub const COMPOSITE_LABEL: &str = "volumetric_fog_upsample_composition";

pub const DOWNSAMPLED_DEPTH_FORMAT: TextureFormat = TextureFormat::R32Float;
pub const FOG_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// 单个渲染目标描述
/// Size and format of one planned target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FogTargetDescriptor {
    pub label: &'static str,
    pub size: UVec2,
    pub format: TextureFormat,
}

impl FogTargetDescriptor {
    pub fn texture_descriptor(&self) -> TextureDescriptor<'static> {
        TextureDescriptor {
            label: Some(self.label),
            size: Extent3d {
                width: self.size.x,
                height: self.size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: self.format,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        }
    }
}

/// 一帧的渲染目标计划
/// The four targets of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FogTargetPlan {
    pub downsampled_depth: FogTargetDescriptor,
    pub fog: FogTargetDescriptor,
    pub blur: FogTargetDescriptor,
    pub composite: FogTargetDescriptor,
}

/// 根据相机目标推导所有中间目标
/// Derives every intermediate target from the camera color target
pub fn plan_targets(camera_size: UVec2, camera_format: TextureFormat) -> FogTargetPlan {
    let half = camera_size / 2;

    let fog = FogTargetDescriptor {
        label: FOG_LABEL,
        size: half,
        format: FOG_FORMAT,
    };

    FogTargetPlan {
        downsampled_depth: FogTargetDescriptor {
            label: DOWNSAMPLED_DEPTH_LABEL,
            size: half,
            format: DOWNSAMPLED_DEPTH_FORMAT,
        },
        fog,
        // Same descriptor so the two can ping-pong.
        blur: FogTargetDescriptor {
            label: FOG_BLUR_LABEL,
            ..fog
        },
        composite: FogTargetDescriptor {
            label: COMPOSITE_LABEL,
            size: camera_size,
            format: camera_format,
        },
    }
}

/// 视图的雾效目标 (每帧从纹理缓存获取)
/// Per-view targets handed out by the texture cache for this frame
///
/// The composite target is the view target's post-process destination, so it has no
/// texture here. After the composite stage it is the camera color.
#[derive(Component)]
pub struct ViewFogTargets {
    pub downsampled_depth: CachedTexture,
    pub fog: CachedTexture,
    pub blur: CachedTexture,
}

/// Camera size the targets are planned from. `None` when the camera has no target yet or
/// its half resolution would be empty.
pub fn fog_target_size(physical_target_size: Option<UVec2>) -> Option<UVec2> {
    physical_target_size.filter(|size| size.x >= 2 && size.y >= 2)
}

pub fn prepare_fog_targets(
    mut commands: Commands,
    mut texture_cache: ResMut<TextureCache>,
    render_device: Res<RenderDevice>,
    views: Query<(Entity, &ExtractedCamera, &ViewTarget), With<ExtractedVolumetricFog>>,
) {
    for (entity, camera, view_target) in &views {
        let Some(size) = fog_target_size(camera.physical_target_size) else {
            commands.entity(entity).remove::<ViewFogTargets>();
            continue;
        };

        let plan = plan_targets(size, view_target.main_texture_format());

        let downsampled_depth = texture_cache.get(
            &render_device,
            plan.downsampled_depth.texture_descriptor(),
        );
        let fog = texture_cache.get(&render_device, plan.fog.texture_descriptor());
        let blur = texture_cache.get(&render_device, plan.blur.texture_descriptor());

        commands.entity(entity).insert(ViewFogTargets {
            downsampled_depth,
            fog,
            blur,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_sizes_truncate() {
        let plan = plan_targets(UVec2::new(1025, 769), TextureFormat::Rgba8UnormSrgb);
        assert_eq!(plan.downsampled_depth.size, UVec2::new(512, 384));
        assert_eq!(plan.fog.size, UVec2::new(512, 384));
        assert_eq!(plan.blur.size, UVec2::new(512, 384));
        assert_eq!(plan.composite.size, UVec2::new(1025, 769));
    }

    #[test]
    fn test_missing_or_tiny_camera_has_no_targets() {
        assert_eq!(fog_target_size(None), None);
        assert_eq!(fog_target_size(Some(UVec2::new(1, 720))), None);
        assert_eq!(fog_target_size(Some(UVec2::new(1280, 1))), None);
        assert_eq!(
            fog_target_size(Some(UVec2::new(2, 2))),
            Some(UVec2::new(2, 2))
        );
    }

    #[test]
    fn test_formats() {
        let plan = plan_targets(UVec2::new(1920, 1080), TextureFormat::Rgba16Float);
        assert_eq!(plan.downsampled_depth.format, TextureFormat::R32Float);
        assert_eq!(plan.fog.format, TextureFormat::Rgba16Float);
        assert_eq!(plan.composite.format, TextureFormat::Rgba16Float);

        let ldr = plan_targets(UVec2::new(1920, 1080), TextureFormat::Rgba8UnormSrgb);
        assert_eq!(ldr.composite.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(ldr.fog.format, TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_fog_and_blur_share_descriptor() {
        let plan = plan_targets(UVec2::new(800, 600), TextureFormat::Rgba8UnormSrgb);
        let fog = plan.fog.texture_descriptor();
        let blur = plan.blur.texture_descriptor();
        assert_eq!(fog.size, blur.size);
        assert_eq!(fog.format, blur.format);
        assert_eq!(fog.usage, blur.usage);
        assert_ne!(fog.label, blur.label);
    }

    #[test]
    fn test_descriptor_is_single_sampled_attachment() {
        let plan = plan_targets(UVec2::new(640, 480), TextureFormat::Rgba8UnormSrgb);
        let desc = plan.downsampled_depth.texture_descriptor();
        assert_eq!(desc.sample_count, 1);
        assert_eq!(desc.size.width, 320);
        assert_eq!(desc.size.height, 240);
        assert!(desc.usage.contains(TextureUsages::RENDER_ATTACHMENT));
        assert!(desc.usage.contains(TextureUsages::TEXTURE_BINDING));
    }
}
