//! Per-frame preparation of fog uniforms and frame plans.
//! 雾效 uniform 与帧计划的逐帧准备
//!
//! ```text
//! [ExtractedVolumetricFog] ─┬→ prepare_fog_uniforms   → ViewFogUniformOffset, ViewFogShaderFeatures
//! [ExtractedFogLights]     ─┘
//! [ViewShadowBindings?]    ──→ prepare_fog_frame_plans → FogFramePlan
//! ```
//!
//! The light arrays in [`FogLightParams`] are rebuilt for every fog view because the
//! contribution toggles and main-light parameters are per camera.

use bevy::core_pipeline::core_3d::Camera3d;
use bevy::pbr::ViewShadowBindings;
use bevy::prelude::*;
use bevy::render::render_resource::TextureUsages;
use bevy::render::renderer::{RenderDevice, RenderQueue};

use super::extract::{ExtractedFogFrame, ExtractedFogLights, ExtractedVolumetricFog};
use super::features::FogShaderFeatures;
use super::stages::{FogFramePlan, ShadowAvailability};
use super::uniform::{FogUniformBuffer, ViewFogUniformOffset, VolumetricFogUniform};
use crate::light::FogLightParams;

/// 视图本帧的着色器特性
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq, Deref)]
pub struct ViewFogShaderFeatures(pub FogShaderFeatures);

/// 让雾效相机的深度纹理可以被着色器读取
/// Marks the depth textures of fog views as shader-readable
///
/// Must run before the core 3D depth textures are prepared.
pub fn prepare_fog_depth_usages(mut cameras: Query<&mut Camera3d, With<ExtractedVolumetricFog>>) {
    for mut camera in &mut cameras {
        camera.depth_texture_usages.0 |= TextureUsages::TEXTURE_BINDING.bits();
    }
}

/// 计算并上传每个视图的雾效 uniform
/// Aggregates light parameters and writes one uniform per fog view
pub fn prepare_fog_uniforms(
    mut commands: Commands,
    mut uniform_buffer: ResMut<FogUniformBuffer>,
    mut light_params: ResMut<FogLightParams>,
    lights: Res<ExtractedFogLights>,
    frame: Res<ExtractedFogFrame>,
    views: Query<(Entity, &ExtractedVolumetricFog)>,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
) {
    let Some(mut writer) =
        uniform_buffer.get_writer(views.iter().len(), &render_device, &render_queue)
    else {
        return;
    };

    for (entity, fog) in &views {
        let contribution = light_params.rebuild(&lights, &fog.settings);
        let features = FogShaderFeatures::new(&fog.settings, &contribution);

        let uniform = VolumetricFogUniform::new(
            &fog.settings,
            &light_params,
            contribution.additional_count,
            frame.0,
        );
        let offset = writer.write(&uniform);

        commands.entity(entity).insert((
            ViewFogUniformOffset(offset),
            ViewFogShaderFeatures(features),
        ));
    }
}

/// 构建并校验每个视图的帧计划
/// Builds and validates the stage plan of every fog view
pub fn prepare_fog_frame_plans(
    mut commands: Commands,
    lights: Res<ExtractedFogLights>,
    views: Query<(Entity, &ExtractedVolumetricFog, Has<ViewShadowBindings>)>,
) {
    for (entity, fog, has_shadow_bindings) in &views {
        let shadows = ShadowAvailability {
            main_light: has_shadow_bindings && lights.main_light_shadows,
            additional_lights: has_shadow_bindings && lights.additional_light_shadows,
        };
        let plan = FogFramePlan::new(fog.settings.blur_iterations, shadows);

        match plan.validate() {
            Ok(()) => {
                commands.entity(entity).insert(plan);
            }
            Err(err) => {
                error!("Discarding volumetric fog plan for {entity}: {err}");
                commands.entity(entity).remove::<FogFramePlan>();
            }
        }
    }
}
