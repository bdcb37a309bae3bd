//! Render-world side of the volumetric fog.
//! 体积雾的渲染世界部分
//!
//! ```text
//! ExtractSchedule: extract_volumetric_fog, extract_fog_lights, extract_fog_frame
//! Prepare:         depth usages → uniforms → frame plans → pipelines
//! PrepareResources: intermediate targets
//! Core3d graph:    one VolumetricFogNode per FogRenderPassEvent
//! ```

use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::core_pipeline::core_3d::prepare_core_3d_depth_textures;
use bevy::prelude::*;
use bevy::render::render_graph::{RenderGraph, ViewNodeRunner};
use bevy::render::render_resource::SpecializedRenderPipelines;
use bevy::render::{ExtractSchedule, Render, RenderApp, RenderSet};

pub mod extract;
pub mod features;
pub mod node;
pub mod pipeline;
pub mod prepare;
pub mod stages;
pub mod targets;
pub mod uniform;

pub use node::{VolumetricFogLabel, VolumetricFogNode};

use crate::light::FogLightParams;
use crate::settings::FogRenderPassEvent;
use crate::shader::FogShaders;
use crate::ssr::ScreenSpaceReflectionLabel;
use extract::{ExtractedFogFrame, ExtractedFogLights};
use pipeline::VolumetricFogPipelines;
use uniform::FogUniformBuffer;

/// Graph nodes surrounding the fog node for each insertion point.
/// 每个插入位置前后的节点
fn insertion_edges(event: FogRenderPassEvent) -> (Node3d, Node3d) {
    match event {
        FogRenderPassEvent::AfterRenderingOpaques => {
            (Node3d::MainOpaquePass, Node3d::MainTransmissivePass)
        }
        FogRenderPassEvent::BeforeRenderingTransparents => {
            (Node3d::MainTransmissivePass, Node3d::MainTransparentPass)
        }
        FogRenderPassEvent::BeforeRenderingPostProcessing => (Node3d::EndMainPass, Node3d::Bloom),
        FogRenderPassEvent::AfterRenderingPostProcessing => {
            (Node3d::Tonemapping, Node3d::EndMainPassPostProcessing)
        }
    }
}

pub struct VolumetricFogRenderPlugin;

impl Plugin for VolumetricFogRenderPlugin {
    fn build(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<FogLightParams>()
            .init_resource::<FogUniformBuffer>()
            .init_resource::<ExtractedFogLights>()
            .init_resource::<ExtractedFogFrame>()
            .init_resource::<SpecializedRenderPipelines<VolumetricFogPipelines>>()
            .add_systems(
                ExtractSchedule,
                (
                    extract::extract_volumetric_fog,
                    extract::extract_fog_lights,
                    extract::extract_fog_frame,
                ),
            )
            .add_systems(
                Render,
                (
                    prepare::prepare_fog_depth_usages
                        .in_set(RenderSet::Prepare)
                        .before(prepare_core_3d_depth_textures),
                    (
                        prepare::prepare_fog_uniforms,
                        prepare::prepare_fog_frame_plans,
                        pipeline::prepare_fog_pipelines,
                    )
                        .chain()
                        .in_set(RenderSet::Prepare),
                    targets::prepare_fog_targets.in_set(RenderSet::PrepareResources),
                ),
            );

        // One node per insertion point; each runs only the views configured for it.
        // 每个插入位置一个节点
        let world = render_app.world_mut();
        let nodes: Vec<_> = FogRenderPassEvent::ALL
            .into_iter()
            .map(|event| (event, ViewNodeRunner::new(VolumetricFogNode::new(event), world)))
            .collect();

        let mut render_graph = world.resource_mut::<RenderGraph>();
        let Some(graph) = render_graph.get_sub_graph_mut(Core3d) else {
            warn!("Core3d render graph missing, volumetric fog nodes not added");
            return;
        };
        for (event, node) in nodes {
            let label = VolumetricFogLabel(event);
            let (before, after) = insertion_edges(event);
            graph.add_node(label.clone(), node);
            for edge in [
                graph.try_add_node_edge(before, label.clone()),
                graph.try_add_node_edge(label.clone(), after),
            ] {
                if let Err(err) = edge {
                    warn!("Volumetric fog node {label:?} not ordered: {err}");
                }
            }
        }
    }

    fn finish(&self, app: &mut App) {
        let Some(shaders) = app.world().get_resource::<FogShaders>().cloned() else {
            return;
        };
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .insert_resource(shaders)
            .init_resource::<VolumetricFogPipelines>();

        // Reflection runs ahead of fog when both sit before post-processing.
        // 两者都在后处理之前时, 反射先于雾效
        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        if let Some(graph) = render_graph.get_sub_graph_mut(Core3d) {
            let fog = VolumetricFogLabel(FogRenderPassEvent::BeforeRenderingPostProcessing);
            if graph.get_node_state(ScreenSpaceReflectionLabel).is_ok() {
                graph.add_node_edge(ScreenSpaceReflectionLabel, fog);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_event_has_distinct_edges() {
        let edges: Vec<_> = FogRenderPassEvent::ALL
            .into_iter()
            .map(insertion_edges)
            .collect();
        for (i, a) in edges.iter().enumerate() {
            for b in &edges[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_post_processing_event_sits_before_bloom() {
        assert_eq!(
            insertion_edges(FogRenderPassEvent::BeforeRenderingPostProcessing),
            (Node3d::EndMainPass, Node3d::Bloom)
        );
    }
}
