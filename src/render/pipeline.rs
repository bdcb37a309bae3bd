use bevy::core_pipeline::fullscreen_vertex_shader::fullscreen_shader_vertex_state;
use bevy::prelude::*;
use bevy::render::render_resource::binding_types::{
    sampler, texture_2d, texture_2d_array, texture_depth_2d, texture_depth_2d_multisampled,
    uniform_buffer,
};
use bevy::render::render_resource::{
    BindGroupLayout, BindGroupLayoutEntries, BindGroupLayoutEntryBuilder, CachedRenderPipelineId,
    ColorTargetState, ColorWrites, CompareFunction, FilterMode, FragmentState, MultisampleState,
    PipelineCache, PrimitiveState, RenderPipelineDescriptor, Sampler, SamplerBindingType,
    SamplerDescriptor, ShaderDefVal, ShaderStages, SpecializedRenderPipeline,
    SpecializedRenderPipelines, TextureFormat, TextureSampleType,
};
use bevy::render::renderer::RenderDevice;
use bevy::render::view::{ViewTarget, ViewUniform};

use super::features::FogShaderFeatures;
use super::prepare::ViewFogShaderFeatures;
use super::stages::{FogFramePlan, FogPass, ShadowAvailability};
use super::targets::{DOWNSAMPLED_DEPTH_FORMAT, FOG_FORMAT};
use super::uniform::VolumetricFogUniform;
use crate::shader::FogShaders;

/// 体积雾渲染管线 (布局与采样器)
/// Bind group layouts and samplers shared by every fog pass
#[derive(Resource)]
pub struct VolumetricFogPipelines {
    pub shaders: FogShaders,
    pub downsample_depth_layout: BindGroupLayout,
    pub downsample_depth_layout_msaa: BindGroupLayout,
    pub render_layout: BindGroupLayout,
    pub render_layout_shadows: BindGroupLayout,
    pub blur_layout: BindGroupLayout,
    pub composite_layout: BindGroupLayout,
    pub composite_layout_msaa: BindGroupLayout,
    pub linear_sampler: Sampler,
    pub nearest_sampler: Sampler,
    pub shadow_sampler: Sampler,
}

#[cfg(not(target_arch = "wasm32"))]
fn point_shadow_texture() -> BindGroupLayoutEntryBuilder {
    bevy::render::render_resource::binding_types::texture_cube_array(TextureSampleType::Depth)
}

#[cfg(target_arch = "wasm32")]
fn point_shadow_texture() -> BindGroupLayoutEntryBuilder {
    bevy::render::render_resource::binding_types::texture_cube(TextureSampleType::Depth)
}

impl FromWorld for VolumetricFogPipelines {
    fn from_world(world: &mut World) -> Self {
        let shaders = world.resource::<FogShaders>().clone();
        let render_device = world.resource::<RenderDevice>();

        // Depth textures differ in type with MSAA, so those layouts come in pairs.
        let downsample_depth_layout = render_device.create_bind_group_layout(
            "volumetric_fog_downsample_depth_layout",
            &BindGroupLayoutEntries::single(ShaderStages::FRAGMENT, texture_depth_2d()),
        );
        let downsample_depth_layout_msaa = render_device.create_bind_group_layout(
            "volumetric_fog_downsample_depth_layout_msaa",
            &BindGroupLayoutEntries::single(
                ShaderStages::FRAGMENT,
                texture_depth_2d_multisampled(),
            ),
        );

        let render_entries = BindGroupLayoutEntries::sequential(
            ShaderStages::FRAGMENT,
            (
                // view
                uniform_buffer::<ViewUniform>(true),
                // fog
                uniform_buffer::<VolumetricFogUniform>(true),
                // downsampled_depth_texture
                texture_2d(TextureSampleType::Float { filterable: false }),
                sampler(SamplerBindingType::NonFiltering),
            ),
        );
        let render_layout = render_device
            .create_bind_group_layout("volumetric_fog_render_layout", &render_entries);

        let mut shadow_entries = render_entries.to_vec();
        shadow_entries.extend_from_slice(&BindGroupLayoutEntries::with_indices(
            ShaderStages::FRAGMENT,
            (
                (4, texture_2d_array(TextureSampleType::Depth)),
                (5, point_shadow_texture()),
                (6, sampler(SamplerBindingType::Comparison)),
            ),
        ));
        let render_layout_shadows = render_device
            .create_bind_group_layout("volumetric_fog_render_layout_shadows", &shadow_entries);

        let blur_layout = render_device.create_bind_group_layout(
            "volumetric_fog_blur_layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::FRAGMENT,
                (
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    sampler(SamplerBindingType::Filtering),
                ),
            ),
        );

        let composite_layout = render_device.create_bind_group_layout(
            "volumetric_fog_composite_layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::FRAGMENT,
                (
                    texture_depth_2d(),
                    texture_2d(TextureSampleType::Float { filterable: false }),
                    // fog_texture
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    sampler(SamplerBindingType::Filtering),
                    sampler(SamplerBindingType::NonFiltering),
                ),
            ),
        );
        let composite_layout_msaa = render_device.create_bind_group_layout(
            "volumetric_fog_composite_layout_msaa",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::FRAGMENT,
                (
                    texture_depth_2d_multisampled(),
                    texture_2d(TextureSampleType::Float { filterable: false }),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    sampler(SamplerBindingType::Filtering),
                    sampler(SamplerBindingType::NonFiltering),
                ),
            ),
        );

        let linear_sampler = render_device.create_sampler(&SamplerDescriptor {
            label: Some("volumetric_fog_linear_sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..default()
        });
        let nearest_sampler = render_device.create_sampler(&SamplerDescriptor {
            label: Some("volumetric_fog_nearest_sampler"),
            ..default()
        });
        // Reversed-Z, matching the engine's shadow maps.
        let shadow_sampler = render_device.create_sampler(&SamplerDescriptor {
            label: Some("volumetric_fog_shadow_sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            compare: Some(CompareFunction::GreaterEqual),
            ..default()
        });

        Self {
            shaders,
            downsample_depth_layout,
            downsample_depth_layout_msaa,
            render_layout,
            render_layout_shadows,
            blur_layout,
            composite_layout,
            composite_layout_msaa,
            linear_sampler,
            nearest_sampler,
            shadow_sampler,
        }
    }
}

/// 管线特化键
/// Specialization key of one fog pass
///
/// Fields that do not affect a pass are normalized away by [`FogPipelineKey::new`] so the
/// passes that ignore them share one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FogPipelineKey {
    pub pass: FogPass,
    pub features: FogShaderFeatures,
    pub shadows: ShadowAvailability,
    pub multisampled: bool,
    pub target_format: TextureFormat,
}

impl FogPipelineKey {
    pub fn new(
        pass: FogPass,
        features: FogShaderFeatures,
        shadows: ShadowAvailability,
        multisampled: bool,
        view_format: TextureFormat,
    ) -> Self {
        let renders = pass == FogPass::Render;
        let reads_camera_depth =
            matches!(pass, FogPass::DownsampleDepth | FogPass::UpsampleComposite);

        Self {
            pass,
            features: if renders { features } else { default() },
            shadows: if renders { shadows } else { default() },
            multisampled: reads_camera_depth && multisampled,
            target_format: match pass {
                FogPass::DownsampleDepth => DOWNSAMPLED_DEPTH_FORMAT,
                FogPass::Render | FogPass::HorizontalBlur | FogPass::VerticalBlur => FOG_FORMAT,
                FogPass::UpsampleComposite => view_format,
            },
        }
    }
}

impl SpecializedRenderPipeline for VolumetricFogPipelines {
    type Key = FogPipelineKey;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        let mut shader_defs: Vec<ShaderDefVal> = Vec::new();
        if key.multisampled {
            shader_defs.push("MULTISAMPLED".into());
        }

        let (layout, shader) = match key.pass {
            FogPass::DownsampleDepth => (
                if key.multisampled {
                    self.downsample_depth_layout_msaa.clone()
                } else {
                    self.downsample_depth_layout.clone()
                },
                self.shaders.downsample_depth.clone(),
            ),
            FogPass::Render => {
                shader_defs.extend(key.features.shader_defs());
                if key.shadows.main_light {
                    shader_defs.push("MAIN_LIGHT_SHADOWS".into());
                }
                if key.shadows.additional_lights {
                    shader_defs.push("ADDITIONAL_LIGHTS_SHADOWS".into());
                }
                let layout = if key.shadows.any() {
                    shader_defs.push("SHADOWS_AVAILABLE".into());
                    self.render_layout_shadows.clone()
                } else {
                    self.render_layout.clone()
                };
                (layout, self.shaders.volumetric_fog.clone())
            }
            FogPass::HorizontalBlur | FogPass::VerticalBlur => {
                (self.blur_layout.clone(), self.shaders.volumetric_fog.clone())
            }
            FogPass::UpsampleComposite => (
                if key.multisampled {
                    self.composite_layout_msaa.clone()
                } else {
                    self.composite_layout.clone()
                },
                self.shaders.volumetric_fog.clone(),
            ),
        };

        RenderPipelineDescriptor {
            label: Some(key.pass.label().into()),
            layout: vec![layout],
            push_constant_ranges: vec![],
            vertex: fullscreen_shader_vertex_state(),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                shader,
                shader_defs,
                entry_point: key.pass.entry_point().into(),
                targets: vec![Some(ColorTargetState {
                    format: key.target_format,
                    blend: None,
                    write_mask: ColorWrites::ALL,
                })],
            }),
            zero_initialize_workgroup_memory: false,
        }
    }
}

/// 视图的各阶段管线
/// Cached pipeline ids of every fog pass for one view
#[derive(Component, Debug, Clone, Copy)]
pub struct ViewFogPipelines {
    pub downsample_depth: CachedRenderPipelineId,
    pub render: CachedRenderPipelineId,
    pub horizontal_blur: CachedRenderPipelineId,
    pub vertical_blur: CachedRenderPipelineId,
    pub upsample_composite: CachedRenderPipelineId,
}

impl ViewFogPipelines {
    pub fn get(&self, pass: FogPass) -> CachedRenderPipelineId {
        match pass {
            FogPass::DownsampleDepth => self.downsample_depth,
            FogPass::Render => self.render,
            FogPass::HorizontalBlur => self.horizontal_blur,
            FogPass::VerticalBlur => self.vertical_blur,
            FogPass::UpsampleComposite => self.upsample_composite,
        }
    }
}

/// 为每个雾效视图特化管线
/// Specializes the five fog pipelines for every fog view
pub fn prepare_fog_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    mut pipelines: ResMut<SpecializedRenderPipelines<VolumetricFogPipelines>>,
    fog_pipelines: Res<VolumetricFogPipelines>,
    views: Query<(
        Entity,
        &ViewTarget,
        &Msaa,
        &ViewFogShaderFeatures,
        &FogFramePlan,
    )>,
) {
    for (entity, view_target, msaa, features, plan) in &views {
        let mut specialize = |pass| {
            pipelines.specialize(
                &pipeline_cache,
                &fog_pipelines,
                FogPipelineKey::new(
                    pass,
                    **features,
                    plan.shadows,
                    msaa.samples() > 1,
                    view_target.main_texture_format(),
                ),
            )
        };

        let view_pipelines = ViewFogPipelines {
            downsample_depth: specialize(FogPass::DownsampleDepth),
            render: specialize(FogPass::Render),
            horizontal_blur: specialize(FogPass::HorizontalBlur),
            vertical_blur: specialize(FogPass::VerticalBlur),
            upsample_composite: specialize(FogPass::UpsampleComposite),
        };

        commands.entity(entity).insert(view_pipelines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features() -> FogShaderFeatures {
        FogShaderFeatures {
            main_light_contribution: true,
            additional_lights_contribution: false,
            apv_contribution: true,
        }
    }

    fn shadows() -> ShadowAvailability {
        ShadowAvailability {
            main_light: true,
            additional_lights: false,
        }
    }

    #[test]
    fn test_key_targets_follow_pass() {
        let view = TextureFormat::Rgba8UnormSrgb;
        let key = |pass| FogPipelineKey::new(pass, features(), shadows(), true, view);

        assert_eq!(key(FogPass::DownsampleDepth).target_format, TextureFormat::R32Float);
        assert_eq!(key(FogPass::Render).target_format, TextureFormat::Rgba16Float);
        assert_eq!(key(FogPass::HorizontalBlur).target_format, TextureFormat::Rgba16Float);
        assert_eq!(key(FogPass::UpsampleComposite).target_format, view);
    }

    #[test]
    fn test_key_normalizes_unused_fields() {
        let view = TextureFormat::Rgba16Float;
        let blur = FogPipelineKey::new(FogPass::VerticalBlur, features(), shadows(), true, view);
        assert_eq!(blur.features, FogShaderFeatures::default());
        assert_eq!(blur.shadows, ShadowAvailability::default());
        assert!(!blur.multisampled);

        let render = FogPipelineKey::new(FogPass::Render, features(), shadows(), true, view);
        assert_eq!(render.features, features());
        assert_eq!(render.shadows, shadows());
        assert!(!render.multisampled);

        let composite =
            FogPipelineKey::new(FogPass::UpsampleComposite, features(), shadows(), true, view);
        assert!(composite.multisampled);
        assert_eq!(composite.features, FogShaderFeatures::default());
    }

    #[test]
    fn test_blur_keys_independent_of_view_features() {
        let view = TextureFormat::Rgba16Float;
        let a = FogPipelineKey::new(FogPass::HorizontalBlur, features(), shadows(), false, view);
        let b = FogPipelineKey::new(
            FogPass::HorizontalBlur,
            FogShaderFeatures::default(),
            ShadowAvailability::default(),
            true,
            TextureFormat::Rgba8UnormSrgb,
        );
        assert_eq!(a, b);
    }
}
