use bevy::diagnostic::FrameCount;
use bevy::log::warn_once;
use bevy::prelude::*;
use bevy::render::Extract;
use bevy::render::sync_world::RenderEntity;

use super::pipeline::ViewFogPipelines;
use super::stages::FogFramePlan;
use super::targets::ViewFogTargets;
use super::uniform::ViewFogUniformOffset;
use crate::gate::{FogCamera, VolumetricFogFeature, decide_insertion, resolve_event};
use crate::light::{FogLightKind, LightCandidate, VisibleLights, VolumetricFogLight};
use crate::render::prepare::ViewFogShaderFeatures;
use crate::settings::{FogRenderPassEvent, VolumetricFogSettings};

/// 渲染世界中通过门控的相机
/// Marks a render-world view that passed the fog gate this frame
#[derive(Component, Debug, Clone, PartialEq)]
pub struct ExtractedVolumetricFog {
    /// 已钳制的设置
    /// Sanitized settings for this frame
    pub settings: VolumetricFogSettings,
    pub event: FogRenderPassEvent,
}

/// 本帧可见光源 (渲染世界)
#[derive(Resource, Debug, Clone, Default, Deref)]
pub struct ExtractedFogLights(pub VisibleLights);

/// 渲染帧计数
/// Rendered frame count, wrapped when bound
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct ExtractedFogFrame(pub u32);

type FogViewComponents = (
    ExtractedVolumetricFog,
    ViewFogTargets,
    FogFramePlan,
    ViewFogUniformOffset,
    ViewFogShaderFeatures,
    ViewFogPipelines,
);

/// 提取相机雾效设置并执行门控
/// Extracts fog settings of every 3D camera and applies the gate
///
/// Render-world view entities are retained between frames, so cameras that fail the gate
/// have every fog component removed here. That keeps a skipped camera free of targets,
/// plans and pipelines.
pub fn extract_volumetric_fog(
    mut commands: Commands,
    feature: Extract<Option<Res<VolumetricFogFeature>>>,
    cameras: Extract<
        Query<(
            &RenderEntity,
            &Camera,
            Option<&VolumetricFogSettings>,
            Option<&FogCamera>,
            Option<&Msaa>,
        ), With<Camera3d>>,
    >,
) {
    let feature = feature.as_deref().copied().unwrap_or_default();

    for (render_entity, camera, settings, fog_camera, msaa) in &cameras {
        let mut entity = commands.entity(render_entity.id());

        let insertion = settings.filter(|_| camera.is_active).and_then(|settings| {
            let settings = settings.sanitized();
            let fog_camera = fog_camera.copied().unwrap_or_default();
            decide_insertion(&feature, &fog_camera, &settings).map(|insertion| (settings, insertion))
        });

        match insertion {
            Some((settings, insertion)) => {
                let samples = msaa.map_or(1, Msaa::samples);
                let event = resolve_event(insertion.event, samples);
                if event != insertion.event {
                    warn_once!(
                        "Volumetric fog at {:?} is not supported with {}x MSAA, using {:?}",
                        insertion.event,
                        samples,
                        event
                    );
                }
                entity.insert(ExtractedVolumetricFog { settings, event });
            }
            None => {
                entity.remove::<FogViewComponents>();
            }
        }
    }
}

type LightQueryItem<'a> = (
    Option<&'a InheritedVisibility>,
    Option<&'a VolumetricFogLight>,
);

fn light_candidate(
    entity: Entity,
    kind: FogLightKind,
    brightness: f32,
    visible: bool,
    shadows_enabled: bool,
    (inherited, fog_light): LightQueryItem,
) -> LightCandidate {
    let owner_active = inherited.is_none_or(|v| v.get());
    LightCandidate {
        entity,
        kind,
        brightness,
        visible,
        shadows_enabled,
        capability: fog_light.map(VolumetricFogLight::params),
        active: owner_active && fog_light.is_some_and(|l| l.enabled),
    }
}

/// 提取可见光源及其雾效参数
/// Resolves each visible light's capability once per frame
pub fn extract_fog_lights(
    mut commands: Commands,
    directional: Extract<
        Query<(
            Entity,
            &DirectionalLight,
            Option<&InheritedVisibility>,
            Option<&VolumetricFogLight>,
        )>,
    >,
    points: Extract<
        Query<(
            Entity,
            &PointLight,
            Option<&ViewVisibility>,
            Option<&InheritedVisibility>,
            Option<&VolumetricFogLight>,
        )>,
    >,
    spots: Extract<
        Query<(
            Entity,
            &SpotLight,
            Option<&ViewVisibility>,
            Option<&InheritedVisibility>,
            Option<&VolumetricFogLight>,
        )>,
    >,
) {
    let directional = directional.iter().map(|(entity, light, inherited, fog)| {
        light_candidate(
            entity,
            FogLightKind::Directional,
            light.illuminance,
            inherited.is_none_or(|v| v.get()),
            light.shadows_enabled,
            (inherited, fog),
        )
    });
    let points = points.iter().map(|(entity, light, view, inherited, fog)| {
        light_candidate(
            entity,
            FogLightKind::Point,
            light.intensity,
            view.is_none_or(|v| v.get()),
            light.shadows_enabled,
            (inherited, fog),
        )
    });
    let spots = spots.iter().map(|(entity, light, view, inherited, fog)| {
        light_candidate(
            entity,
            FogLightKind::Spot,
            light.intensity,
            view.is_none_or(|v| v.get()),
            light.shadows_enabled,
            (inherited, fog),
        )
    });

    commands.insert_resource(ExtractedFogLights(VisibleLights::collect(
        directional.chain(points).chain(spots),
    )));
}

pub fn extract_fog_frame(mut commands: Commands, frame_count: Extract<Option<Res<FrameCount>>>) {
    let frame = frame_count.as_deref().map_or(0, |count| count.0);
    commands.insert_resource(ExtractedFogFrame(frame));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::ecs::system::RunSystemOnce;
    use bevy::render::MainWorld;
    use bevy::render::render_resource::CachedRenderPipelineId;

    use crate::render::features::FogShaderFeatures;
    use crate::render::stages::ShadowAvailability;

    /// Runs fog extraction once with `main_world` as the extracted-from world.
    fn extract_frame(main_world: &mut World, render_world: &mut World) {
        let mut main = MainWorld::default();
        std::mem::swap(&mut *main, main_world);
        render_world.insert_resource(main);

        render_world.run_system_once(extract_volumetric_fog).unwrap();

        let mut main = render_world.remove_resource::<MainWorld>().unwrap();
        std::mem::swap(&mut *main, main_world);
    }

    fn spawn_camera(
        main_world: &mut World,
        render_world: &mut World,
        settings: VolumetricFogSettings,
        msaa: Msaa,
    ) -> (Entity, Entity) {
        let view = render_world.spawn_empty().id();
        let camera = main_world
            .spawn((
                Camera::default(),
                Camera3d::default(),
                msaa,
                settings,
                RenderEntity::from(view),
            ))
            .id();
        (camera, view)
    }

    fn active_fog() -> VolumetricFogSettings {
        VolumetricFogSettings {
            enabled: true,
            ..default()
        }
    }

    fn stale_view_components() -> (FogFramePlan, ViewFogUniformOffset, ViewFogShaderFeatures, ViewFogPipelines) {
        let id = CachedRenderPipelineId::INVALID;
        (
            FogFramePlan::new(2, ShadowAvailability::default()),
            ViewFogUniformOffset(0),
            ViewFogShaderFeatures(FogShaderFeatures::default()),
            ViewFogPipelines {
                downsample_depth: id,
                render: id,
                horizontal_blur: id,
                vertical_blur: id,
                upsample_composite: id,
            },
        )
    }

    #[test]
    fn test_zero_density_clears_previous_frame_state() {
        let mut main_world = World::new();
        let mut render_world = World::new();
        let (camera, view) =
            spawn_camera(&mut main_world, &mut render_world, active_fog(), Msaa::Off);

        extract_frame(&mut main_world, &mut render_world);
        assert!(render_world.get::<ExtractedVolumetricFog>(view).is_some());

        // State the prepare systems would have left on the view.
        render_world.entity_mut(view).insert(stale_view_components());

        main_world
            .get_mut::<VolumetricFogSettings>(camera)
            .unwrap()
            .density = 0.0;
        extract_frame(&mut main_world, &mut render_world);

        let view = render_world.entity(view);
        assert!(!view.contains::<ExtractedVolumetricFog>());
        assert!(!view.contains::<FogFramePlan>());
        assert!(!view.contains::<ViewFogUniformOffset>());
        assert!(!view.contains::<ViewFogShaderFeatures>());
        assert!(!view.contains::<ViewFogPipelines>());
        assert!(!view.contains::<ViewFogTargets>());
    }

    #[test]
    fn test_extracted_settings_are_sanitized() {
        let mut main_world = World::new();
        let mut render_world = World::new();
        let settings = VolumetricFogSettings {
            blur_iterations: 40,
            density: 7.0,
            ..active_fog()
        };
        let (_, view) = spawn_camera(&mut main_world, &mut render_world, settings, Msaa::Off);

        extract_frame(&mut main_world, &mut render_world);

        let extracted = render_world.get::<ExtractedVolumetricFog>(view).unwrap();
        assert_eq!(extracted.settings.blur_iterations, 4);
        assert_eq!(extracted.settings.density, 1.0);
    }

    #[test]
    fn test_msaa_camera_uses_post_processing_insertion() {
        let mut main_world = World::new();
        let mut render_world = World::new();
        let settings = VolumetricFogSettings {
            render_pass_event: FogRenderPassEvent::AfterRenderingOpaques,
            ..active_fog()
        };
        let (_, msaa_view) =
            spawn_camera(&mut main_world, &mut render_world, settings.clone(), Msaa::Sample4);
        let (_, plain_view) =
            spawn_camera(&mut main_world, &mut render_world, settings, Msaa::Off);

        extract_frame(&mut main_world, &mut render_world);

        let event = |view| {
            render_world
                .get::<ExtractedVolumetricFog>(view)
                .map(|fog| fog.event)
        };
        assert_eq!(
            event(msaa_view),
            Some(FogRenderPassEvent::BeforeRenderingPostProcessing)
        );
        assert_eq!(
            event(plain_view),
            Some(FogRenderPassEvent::AfterRenderingOpaques)
        );
    }
}
