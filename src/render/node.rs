use bevy::ecs::query::QueryItem;
use bevy::pbr::ViewShadowBindings;
use bevy::prelude::*;
use bevy::render::render_graph::{NodeRunError, RenderGraphContext, RenderLabel, ViewNode};
use bevy::render::render_resource::{
    BindGroup, BindGroupEntries, LoadOp, Operations, PipelineCache, RenderPassColorAttachment,
    RenderPassDescriptor, RenderPipeline, StoreOp, TextureView,
};
use bevy::render::renderer::RenderContext;
use bevy::render::view::{ViewDepthTexture, ViewTarget, ViewUniformOffset, ViewUniforms};

use super::extract::ExtractedVolumetricFog;
use super::pipeline::{ViewFogPipelines, VolumetricFogPipelines};
use super::stages::{Blit, FogFramePlan, FogPass, FogResource};
use super::targets::ViewFogTargets;
use super::uniform::{FogUniformBuffer, ViewFogUniformOffset};
use crate::settings::FogRenderPassEvent;

/// 每个插入位置对应一个节点
/// Render graph label of the fog node registered at one insertion point
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct VolumetricFogLabel(pub FogRenderPassEvent);

/// 体积雾渲染节点
/// Records the whole fog pipeline of one view
///
/// One instance exists per [`FogRenderPassEvent`]; it skips views configured for another
/// insertion point. All stages record into this single node, in plan order, so the blur
/// ping-pong can never interleave with other work on the fog targets.
pub struct VolumetricFogNode {
    event: FogRenderPassEvent,
}

impl VolumetricFogNode {
    pub fn new(event: FogRenderPassEvent) -> Self {
        Self { event }
    }
}

impl ViewNode for VolumetricFogNode {
    type ViewQuery = (
        &'static ViewTarget,
        &'static ViewDepthTexture,
        &'static Msaa,
        &'static ExtractedVolumetricFog,
        &'static FogFramePlan,
        &'static ViewFogTargets,
        &'static ViewFogPipelines,
        &'static ViewFogUniformOffset,
        &'static ViewUniformOffset,
        Option<&'static ViewShadowBindings>,
    );

    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        (
            view_target,
            view_depth,
            msaa,
            fog,
            plan,
            targets,
            view_pipelines,
            fog_uniform_offset,
            view_uniform_offset,
            shadow_bindings,
        ): QueryItem<Self::ViewQuery>,
        world: &World,
    ) -> Result<(), NodeRunError> {
        if fog.event != self.event {
            return Ok(());
        }

        let fog_pipelines = world.resource::<VolumetricFogPipelines>();
        let pipeline_cache = world.resource::<PipelineCache>();

        let Some(fog_binding) = world.resource::<FogUniformBuffer>().binding() else {
            return Ok(());
        };
        let Some(view_binding) = world.resource::<ViewUniforms>().uniforms.binding() else {
            return Ok(());
        };

        // Resolve every pipeline first: a frame either records all stages or none.
        // 先解析所有管线: 要么记录全部阶段, 要么全部跳过
        let mut resolved: Vec<(&Blit, &RenderPipeline)> = Vec::with_capacity(plan.blits.len());
        for blit in &plan.blits {
            let Some(pipeline) =
                pipeline_cache.get_render_pipeline(view_pipelines.get(blit.pass))
            else {
                return Ok(());
            };
            resolved.push((blit, pipeline));
        }

        let shadows = match (plan.shadows.any(), shadow_bindings) {
            (true, Some(bindings)) => Some(bindings),
            (true, None) => return Ok(()),
            (false, _) => None,
        };

        let multisampled = msaa.samples() > 1;
        let depth_view = view_depth.view();
        let render_device = render_context.render_device().clone();

        for (blit, pipeline) in resolved {
            match blit.pass {
                FogPass::DownsampleDepth => {
                    let layout = if multisampled {
                        &fog_pipelines.downsample_depth_layout_msaa
                    } else {
                        &fog_pipelines.downsample_depth_layout
                    };
                    let bind_group = render_device.create_bind_group(
                        "volumetric_fog_downsample_depth_bind_group",
                        layout,
                        &BindGroupEntries::single(depth_view),
                    );
                    let Some(target) = fog_target_view(targets, blit.target) else {
                        return Ok(());
                    };
                    draw_fullscreen(render_context, blit.pass, pipeline, &bind_group, &[], target);
                }
                FogPass::Render => {
                    let bind_group = match shadows {
                        Some(shadows) => render_device.create_bind_group(
                            "volumetric_fog_render_bind_group",
                            &fog_pipelines.render_layout_shadows,
                            &BindGroupEntries::sequential((
                                view_binding.clone(),
                                fog_binding.clone(),
                                &targets.downsampled_depth.default_view,
                                &fog_pipelines.nearest_sampler,
                                &shadows.directional_light_depth_texture_view,
                                &shadows.point_light_depth_texture_view,
                                &fog_pipelines.shadow_sampler,
                            )),
                        ),
                        None => render_device.create_bind_group(
                            "volumetric_fog_render_bind_group",
                            &fog_pipelines.render_layout,
                            &BindGroupEntries::sequential((
                                view_binding.clone(),
                                fog_binding.clone(),
                                &targets.downsampled_depth.default_view,
                                &fog_pipelines.nearest_sampler,
                            )),
                        ),
                    };
                    let Some(target) = fog_target_view(targets, blit.target) else {
                        return Ok(());
                    };
                    draw_fullscreen(
                        render_context,
                        blit.pass,
                        pipeline,
                        &bind_group,
                        &[view_uniform_offset.offset, fog_uniform_offset.0],
                        target,
                    );
                }
                FogPass::HorizontalBlur | FogPass::VerticalBlur => {
                    let (Some(source), Some(target)) = (
                        fog_target_view(targets, blit.source),
                        fog_target_view(targets, blit.target),
                    ) else {
                        return Ok(());
                    };
                    let bind_group = render_device.create_bind_group(
                        "volumetric_fog_blur_bind_group",
                        &fog_pipelines.blur_layout,
                        &BindGroupEntries::sequential((source, &fog_pipelines.linear_sampler)),
                    );
                    draw_fullscreen(render_context, blit.pass, pipeline, &bind_group, &[], target);
                }
                FogPass::UpsampleComposite => {
                    let Some(fog_view) = fog_target_view(targets, blit.source) else {
                        return Ok(());
                    };
                    // Flips the main texture: the destination is the camera color from here on.
                    // 翻转主纹理: 之后目标纹理即为相机颜色
                    let post_process = view_target.post_process_write();
                    let layout = if multisampled {
                        &fog_pipelines.composite_layout_msaa
                    } else {
                        &fog_pipelines.composite_layout
                    };
                    let bind_group = render_device.create_bind_group(
                        "volumetric_fog_composite_bind_group",
                        layout,
                        &BindGroupEntries::sequential((
                            depth_view,
                            &targets.downsampled_depth.default_view,
                            fog_view,
                            post_process.source,
                            &fog_pipelines.linear_sampler,
                            &fog_pipelines.nearest_sampler,
                        )),
                    );
                    draw_fullscreen(
                        render_context,
                        blit.pass,
                        pipeline,
                        &bind_group,
                        &[],
                        post_process.destination,
                    );
                }
            }
        }

        Ok(())
    }
}

/// Texture view of an intermediate target. Camera resources have no view here.
fn fog_target_view(targets: &ViewFogTargets, resource: FogResource) -> Option<&TextureView> {
    match resource {
        FogResource::DownsampledDepth => Some(&targets.downsampled_depth.default_view),
        FogResource::Fog => Some(&targets.fog.default_view),
        FogResource::Blur => Some(&targets.blur.default_view),
        _ => None,
    }
}

fn draw_fullscreen(
    render_context: &mut RenderContext,
    pass: FogPass,
    pipeline: &RenderPipeline,
    bind_group: &BindGroup,
    dynamic_offsets: &[u32],
    target: &TextureView,
) {
    let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
        label: Some(pass.label()),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: Operations {
                load: LoadOp::Clear(default()),
                store: StoreOp::Store,
            },
        })],
        ..default()
    });

    render_pass.set_render_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, dynamic_offsets);
    render_pass.draw(0..3, 0..1);
}
