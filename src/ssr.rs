//! Screen-space reflection, a single full-screen pass.
//! 屏幕空间反射, 单次全屏绘制
//!
//! Reads the camera color and depth, writes the reflected color into the view target's
//! post-process destination and runs right before post-processing. When the volumetric
//! fog is inserted at the same point, reflection runs first.

use bevy::asset::DirectAssetAccessExt;
use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::core_pipeline::fullscreen_vertex_shader::fullscreen_shader_vertex_state;
use bevy::ecs::query::QueryItem;
use bevy::prelude::*;
use bevy::render::extract_component::{
    ComponentUniforms, DynamicUniformIndex, ExtractComponent, ExtractComponentPlugin,
    UniformComponentPlugin,
};
use bevy::render::extract_resource::ExtractResourcePlugin;
use bevy::render::render_graph::{
    NodeRunError, RenderGraphApp, RenderGraphContext, RenderLabel, ViewNode, ViewNodeRunner,
};
use bevy::render::render_resource::binding_types::{
    sampler, texture_2d, texture_depth_2d, texture_depth_2d_multisampled, uniform_buffer,
};
use bevy::render::render_resource::{
    BindGroupEntries, BindGroupLayout, BindGroupLayoutEntries, CachedRenderPipelineId,
    ColorTargetState, ColorWrites, FilterMode, FragmentState, LoadOp, MultisampleState,
    Operations, PipelineCache, PrimitiveState, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, Sampler, SamplerBindingType, SamplerDescriptor, ShaderStages,
    ShaderType, SpecializedRenderPipeline, SpecializedRenderPipelines, StoreOp, TextureFormat,
    TextureSampleType, TextureUsages,
};
use bevy::render::renderer::{RenderContext, RenderDevice};
use bevy::render::view::{
    ViewDepthTexture, ViewTarget, ViewUniform, ViewUniformOffset, ViewUniforms,
};
use bevy::render::{Render, RenderApp, RenderSet};
use serde::{Deserialize, Serialize};

use crate::error::FogFeatureError;
use crate::gate::{FogCamera, VolumetricFogFeature};
use crate::shader::is_wgsl_path;

pub const DEFAULT_SCREEN_SPACE_REFLECTION_SHADER: &str = "shaders/screen_space_reflection.wgsl";
const ENTRY_POINT: &str = "screen_space_reflection";

/// 屏幕空间反射设置
/// Screen-space reflection settings for one camera. Active when `intensity > 0`.
#[derive(
    Component, Debug, Clone, Copy, PartialEq, Default, Reflect, ShaderType, Serialize, Deserialize,
)]
#[reflect(Component, Default)]
#[serde(default)]
pub struct ScreenSpaceReflectionSettings {
    /// 反射强度 [0, 1]
    pub intensity: f32,
    // WebGL2 uniforms must be 16-byte sized.
    #[cfg(feature = "webgl2")]
    #[reflect(ignore)]
    #[serde(skip)]
    pub _webgl2_padding_0: f32,
    #[cfg(feature = "webgl2")]
    #[reflect(ignore)]
    #[serde(skip)]
    pub _webgl2_padding_1: Vec2,
}

impl ScreenSpaceReflectionSettings {
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity,
            ..default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.intensity > 0.0
    }
}

impl ExtractComponent for ScreenSpaceReflectionSettings {
    type QueryData = (&'static Self, Option<&'static FogCamera>);
    type QueryFilter = With<Camera3d>;
    type Out = Self;

    fn extract_component((settings, camera): QueryItem<'_, Self::QueryData>) -> Option<Self::Out> {
        let settings = Self::new(settings.intensity.clamp(0.0, 1.0));
        let camera_ok = camera.is_none_or(FogCamera::allows_post_processing);
        (settings.is_active() && camera_ok).then_some(settings)
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct ScreenSpaceReflectionLabel;

/// 屏幕空间反射插件
pub struct ScreenSpaceReflectionPlugin {
    pub shader_path: String,
}

impl Default for ScreenSpaceReflectionPlugin {
    fn default() -> Self {
        Self {
            shader_path: DEFAULT_SCREEN_SPACE_REFLECTION_SHADER.to_string(),
        }
    }
}

impl Plugin for ScreenSpaceReflectionPlugin {
    fn build(&self, app: &mut App) {
        if !is_wgsl_path(&self.shader_path) {
            let err = FogFeatureError::InvalidShaderPath {
                name: "screen space reflection",
                path: self.shader_path.clone(),
            };
            error!("{err}");
            panic!("{err}");
        }

        app.register_type::<ScreenSpaceReflectionSettings>()
            .init_resource::<VolumetricFogFeature>()
            .add_plugins((
                ExtractComponentPlugin::<ScreenSpaceReflectionSettings>::default(),
                UniformComponentPlugin::<ScreenSpaceReflectionSettings>::default(),
            ));
        if !app.is_plugin_added::<ExtractResourcePlugin<VolumetricFogFeature>>() {
            app.add_plugins(ExtractResourcePlugin::<VolumetricFogFeature>::default());
        }

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<SpecializedRenderPipelines<ScreenSpaceReflectionPipeline>>()
            .add_systems(
                Render,
                (
                    prepare_ssr_depth_usages
                        .in_set(RenderSet::Prepare)
                        .before(bevy::core_pipeline::core_3d::prepare_core_3d_depth_textures),
                    prepare_ssr_pipelines.in_set(RenderSet::Prepare),
                ),
            )
            .add_render_graph_node::<ViewNodeRunner<ScreenSpaceReflectionNode>>(
                Core3d,
                ScreenSpaceReflectionLabel,
            )
            .add_render_graph_edges(
                Core3d,
                (Node3d::EndMainPass, ScreenSpaceReflectionLabel, Node3d::Bloom),
            );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .insert_resource(ScreenSpaceReflectionShader(self.shader_path.clone()))
            .init_resource::<ScreenSpaceReflectionPipeline>();
    }
}

#[derive(Resource, Debug, Clone)]
struct ScreenSpaceReflectionShader(String);

#[derive(Resource)]
pub struct ScreenSpaceReflectionPipeline {
    shader: Handle<Shader>,
    layout: BindGroupLayout,
    layout_msaa: BindGroupLayout,
    sampler: Sampler,
}

impl FromWorld for ScreenSpaceReflectionPipeline {
    fn from_world(world: &mut World) -> Self {
        let path = world.resource::<ScreenSpaceReflectionShader>().0.clone();
        let shader = world.load_asset(path);
        let render_device = world.resource::<RenderDevice>();

        let layout = render_device.create_bind_group_layout(
            "screen_space_reflection_layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::FRAGMENT,
                (
                    uniform_buffer::<ScreenSpaceReflectionSettings>(true),
                    uniform_buffer::<ViewUniform>(true),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    texture_depth_2d(),
                    sampler(SamplerBindingType::Filtering),
                ),
            ),
        );
        let layout_msaa = render_device.create_bind_group_layout(
            "screen_space_reflection_layout_msaa",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::FRAGMENT,
                (
                    uniform_buffer::<ScreenSpaceReflectionSettings>(true),
                    uniform_buffer::<ViewUniform>(true),
                    texture_2d(TextureSampleType::Float { filterable: true }),
                    texture_depth_2d_multisampled(),
                    sampler(SamplerBindingType::Filtering),
                ),
            ),
        );

        let sampler = render_device.create_sampler(&SamplerDescriptor {
            label: Some("screen_space_reflection_sampler"),
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            ..default()
        });

        Self {
            shader,
            layout,
            layout_msaa,
            sampler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScreenSpaceReflectionPipelineKey {
    pub target_format: TextureFormat,
    pub multisampled: bool,
}

impl SpecializedRenderPipeline for ScreenSpaceReflectionPipeline {
    type Key = ScreenSpaceReflectionPipelineKey;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        let (layout, shader_defs) = if key.multisampled {
            (self.layout_msaa.clone(), vec!["MULTISAMPLED".into()])
        } else {
            (self.layout.clone(), vec![])
        };

        RenderPipelineDescriptor {
            label: Some("screen_space_reflection_pipeline".into()),
            layout: vec![layout],
            push_constant_ranges: vec![],
            vertex: fullscreen_shader_vertex_state(),
            primitive: PrimitiveState::default(),
            depth_stencil: None,
            multisample: MultisampleState::default(),
            fragment: Some(FragmentState {
                shader: self.shader.clone(),
                shader_defs,
                entry_point: ENTRY_POINT.into(),
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

#[derive(Component, Debug, Clone, Copy)]
pub struct ViewScreenSpaceReflectionPipeline(pub CachedRenderPipelineId);

fn prepare_ssr_depth_usages(
    mut cameras: Query<&mut Camera3d, With<ScreenSpaceReflectionSettings>>,
) {
    for mut camera in &mut cameras {
        camera.depth_texture_usages.0 |= TextureUsages::TEXTURE_BINDING.bits();
    }
}

fn prepare_ssr_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    mut pipelines: ResMut<SpecializedRenderPipelines<ScreenSpaceReflectionPipeline>>,
    ssr_pipeline: Res<ScreenSpaceReflectionPipeline>,
    feature: Option<Res<VolumetricFogFeature>>,
    views: Query<(Entity, &ViewTarget, &Msaa), With<ScreenSpaceReflectionSettings>>,
) {
    let post_processing = feature.is_none_or(|feature| feature.post_processing);

    for (entity, view_target, msaa) in &views {
        if !post_processing {
            commands
                .entity(entity)
                .remove::<ViewScreenSpaceReflectionPipeline>();
            continue;
        }

        let pipeline_id = pipelines.specialize(
            &pipeline_cache,
            &ssr_pipeline,
            ScreenSpaceReflectionPipelineKey {
                target_format: view_target.main_texture_format(),
                multisampled: msaa.samples() > 1,
            },
        );
        commands
            .entity(entity)
            .insert(ViewScreenSpaceReflectionPipeline(pipeline_id));
    }
}

#[derive(Default)]
pub struct ScreenSpaceReflectionNode;

impl ViewNode for ScreenSpaceReflectionNode {
    type ViewQuery = (
        &'static ScreenSpaceReflectionSettings,
        &'static ViewTarget,
        &'static ViewDepthTexture,
        &'static Msaa,
        &'static ViewScreenSpaceReflectionPipeline,
        &'static DynamicUniformIndex<ScreenSpaceReflectionSettings>,
        &'static ViewUniformOffset,
    );

    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        (_settings, view_target, view_depth, msaa, view_pipeline, settings_index, view_uniform_offset): QueryItem<
            Self::ViewQuery,
        >,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let ssr_pipeline = world.resource::<ScreenSpaceReflectionPipeline>();
        let pipeline_cache = world.resource::<PipelineCache>();

        let Some(pipeline) = pipeline_cache.get_render_pipeline(view_pipeline.0) else {
            return Ok(());
        };

        let settings_uniforms = world.resource::<ComponentUniforms<ScreenSpaceReflectionSettings>>();
        let Some(settings_binding) = settings_uniforms.uniforms().binding() else {
            return Ok(());
        };
        let Some(view_binding) = world.resource::<ViewUniforms>().uniforms.binding() else {
            return Ok(());
        };

        let post_process = view_target.post_process_write();
        let layout = if msaa.samples() > 1 {
            &ssr_pipeline.layout_msaa
        } else {
            &ssr_pipeline.layout
        };

        let bind_group = render_context.render_device().create_bind_group(
            "screen_space_reflection_bind_group",
            layout,
            &BindGroupEntries::sequential((
                settings_binding.clone(),
                view_binding.clone(),
                post_process.source,
                view_depth.view(),
                &ssr_pipeline.sampler,
            )),
        );

        let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
            label: Some("screen_space_reflection_pass"),
            color_attachments: &[Some(RenderPassColorAttachment {
                view: post_process.destination,
                resolve_target: None,
                ops: Operations {
                    load: LoadOp::Clear(default()),
                    store: StoreOp::Store,
                },
            })],
            ..default()
        });

        render_pass.set_render_pipeline(pipeline);
        render_pass.set_bind_group(
            0,
            &bind_group,
            &[settings_index.index(), view_uniform_offset.offset],
        );
        render_pass.draw(0..3, 0..1);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_intensity_is_inactive() {
        assert!(!ScreenSpaceReflectionSettings::default().is_active());
        assert!(ScreenSpaceReflectionSettings::new(0.3).is_active());
    }

    #[test]
    fn test_settings_parse_with_defaults() {
        let settings: ScreenSpaceReflectionSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, ScreenSpaceReflectionSettings::default());

        let settings: ScreenSpaceReflectionSettings =
            serde_json::from_str(r#"{ "intensity": 0.75 }"#).unwrap();
        assert_eq!(settings.intensity, 0.75);
    }

    #[cfg(feature = "webgl2")]
    #[test]
    fn test_uniform_is_padded_for_webgl2() {
        assert_eq!(ScreenSpaceReflectionSettings::min_size().get(), 16);
    }
}
