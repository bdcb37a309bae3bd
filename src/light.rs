//! Per-light fog parameters and their per-frame aggregation.
//! 每个光源的雾效参数及其逐帧聚合
//!
//! Lights opt into fog through the [`VolumetricFogLight`] capability. During extraction every
//! visible light becomes a [`VisibleLight`] record whose capability is resolved once, and
//! [`FogLightParams`] turns the record list into the three fixed-capacity arrays the fog
//! shader reads.
//!
//! # Slot layout
//! ```text
//! slot:        0   1   2  ...  MAX_ADDITIONAL_LIGHTS-1 | MAX_ADDITIONAL_LIGHTS
//! anisotropy:  additional lights in visible order      | main light
//! scattering:  additional lights in visible order      | main light
//! radius²:     additional lights in visible order      | (no slot)
//! ```

use bevy::log::debug_once;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::settings::{MAX_SCATTERING, VolumetricFogSettings};

/// 附加光源的最大数量
/// Maximum number of additional lights the fog shader can read
pub const MAX_ADDITIONAL_LIGHTS: usize = 31;
/// 各向异性/散射数组的容量 (附加光源 + 主光源)
/// Capacity of the anisotropy and scattering arrays (additional lights plus the main light)
pub const LIGHT_SLOTS: usize = MAX_ADDITIONAL_LIGHTS + 1;
/// 主光源使用的槽位
/// Slot reserved for the main light
pub const MAIN_LIGHT_SLOT: usize = LIGHT_SLOTS - 1;

/// 光源的体积雾参数
/// Volumetric fog capability of a point, spot or directional light
///
/// Lights without this component still render but contribute nothing to the fog.
/// Every setter clamps its value independently.
#[derive(Component, Debug, Clone, PartialEq, Reflect, Serialize, Deserialize)]
#[reflect(Component, Default)]
#[serde(default)]
pub struct VolumetricFogLight {
    /// 是否启用, 关闭时该光源视为零贡献
    /// When false the light is treated as having no capability
    pub enabled: bool,
    anisotropy: f32,
    scattering: f32,
    radius: f32,
}

impl Default for VolumetricFogLight {
    fn default() -> Self {
        Self {
            enabled: true,
            anisotropy: 0.25,
            scattering: 1.0,
            radius: 0.2,
        }
    }
}

impl VolumetricFogLight {
    pub fn new(anisotropy: f32, scattering: f32, radius: f32) -> Self {
        let mut light = Self::default();
        light.set_anisotropy(anisotropy);
        light.set_scattering(scattering);
        light.set_radius(radius);
        light
    }

    pub fn anisotropy(&self) -> f32 {
        self.anisotropy
    }

    pub fn scattering(&self) -> f32 {
        self.scattering
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Clamped to [-1, 1].
    pub fn set_anisotropy(&mut self, anisotropy: f32) {
        self.anisotropy = anisotropy.clamp(-1.0, 1.0);
    }

    /// Clamped to [0, 16].
    pub fn set_scattering(&mut self, scattering: f32) {
        self.scattering = scattering.clamp(0.0, MAX_SCATTERING);
    }

    /// Clamped to [0, 1].
    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius.clamp(0.0, 1.0);
    }

    /// 返回钳制后的副本
    /// Copy with every field clamped. Deserialization and reflection write the fields
    /// without going through the setters.
    pub fn sanitized(&self) -> Self {
        Self::new(self.anisotropy, self.scattering, self.radius).with_enabled(self.enabled)
    }

    fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Clamped parameters carried on the light's [`VisibleLight`] record.
    pub fn params(&self) -> VolumetricLightParams {
        let light = self.sanitized();
        VolumetricLightParams {
            anisotropy: light.anisotropy,
            scattering: light.scattering,
            radius: light.radius,
        }
    }
}

/// 解析后的光源雾效参数
/// Resolved capability values carried on a [`VisibleLight`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VolumetricLightParams {
    pub anisotropy: f32,
    pub scattering: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FogLightKind {
    Directional,
    Point,
    Spot,
}

/// 本帧可见光源记录
/// One visible light this frame, with its capability resolved once during extraction
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLight {
    pub index: usize,
    pub kind: FogLightKind,
    /// 体积雾参数 (无则为零贡献)
    pub volumetric: Option<VolumetricLightParams>,
    /// 所属实体是否处于激活状态
    /// Whether the owning entity and its capability are both enabled
    pub active: bool,
}

impl VisibleLight {
    /// Values written into this light's slot: its capability when present and active,
    /// zero contribution otherwise.
    pub fn contribution(&self) -> VolumetricLightParams {
        match self.volumetric {
            Some(params) if self.active => params,
            _ => VolumetricLightParams::default(),
        }
    }
}

/// 提取阶段使用的光源候选
/// Light candidate gathered from the main world before ordering
#[derive(Debug, Clone)]
pub struct LightCandidate {
    pub entity: Entity,
    pub kind: FogLightKind,
    /// Illuminance for directional lights, intensity otherwise
    pub brightness: f32,
    pub visible: bool,
    pub shadows_enabled: bool,
    pub capability: Option<VolumetricLightParams>,
    pub active: bool,
}

/// 本帧可见光源列表
/// Ordered visible lights plus the main light index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleLights {
    pub lights: Vec<VisibleLight>,
    pub main_light_index: Option<usize>,
    /// 主光源是否投射阴影
    pub main_light_shadows: bool,
    /// 是否有附加光源投射阴影
    pub additional_light_shadows: bool,
}

impl VisibleLights {
    /// 排序并选出主光源
    /// Orders candidates and picks the main light
    ///
    /// Directional lights come first, brightest first, and the brightest one is the main
    /// light. Other lights follow in entity order so the slot order stays stable between
    /// frames. Invisible candidates are dropped.
    pub fn collect(candidates: impl IntoIterator<Item = LightCandidate>) -> Self {
        let mut candidates: Vec<_> = candidates.into_iter().filter(|c| c.visible).collect();
        candidates.sort_by(|a, b| {
            let rank = |c: &LightCandidate| (c.kind != FogLightKind::Directional) as u8;
            rank(a)
                .cmp(&rank(b))
                .then_with(|| match (a.kind, b.kind) {
                    (FogLightKind::Directional, FogLightKind::Directional) => {
                        b.brightness.total_cmp(&a.brightness)
                    }
                    _ => std::cmp::Ordering::Equal,
                })
                .then_with(|| a.entity.cmp(&b.entity))
        });

        let main_light_index = candidates
            .first()
            .filter(|c| c.kind == FogLightKind::Directional)
            .map(|_| 0);

        let main_light_shadows = main_light_index
            .and_then(|index| candidates.get(index))
            .is_some_and(|c| c.shadows_enabled);
        let additional_light_shadows = candidates
            .iter()
            .enumerate()
            .any(|(index, c)| Some(index) != main_light_index && c.shadows_enabled);

        let lights = candidates
            .into_iter()
            .enumerate()
            .map(|(index, c)| VisibleLight {
                index,
                kind: c.kind,
                volumetric: c.capability,
                active: c.active,
            })
            .collect();

        Self {
            lights,
            main_light_index,
            main_light_shadows,
            additional_light_shadows,
        }
    }

    /// Visible lights other than the main light, in visible order.
    pub fn additional(&self) -> impl Iterator<Item = &VisibleLight> {
        let main = self.main_light_index;
        self.lights
            .iter()
            .filter(move |light| Some(light.index) != main)
    }

    /// Number of additional lights the shader will read, capped at the slot capacity.
    pub fn additional_count(&self) -> usize {
        self.additional().count().min(MAX_ADDITIONAL_LIGHTS)
    }
}

/// 本帧光源贡献标志
/// Contribution flags produced alongside the per-light arrays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightContribution {
    pub main: bool,
    pub additional: bool,
    pub additional_count: usize,
}

/// 逐光源雾效参数数组
/// Fixed-capacity per-light parameter arrays, owned by the render world
///
/// The arrays are allocated once and never resized. Every [`rebuild`](Self::rebuild)
/// zeroes all entries first, so slots left over from a frame with more lights are inert.
#[derive(Resource, Debug, Clone, PartialEq)]
pub struct FogLightParams {
    anisotropies: [f32; LIGHT_SLOTS],
    scatterings: [f32; LIGHT_SLOTS],
    radii_sq: [f32; MAX_ADDITIONAL_LIGHTS],
}

impl Default for FogLightParams {
    fn default() -> Self {
        Self {
            anisotropies: [0.0; LIGHT_SLOTS],
            scatterings: [0.0; LIGHT_SLOTS],
            radii_sq: [0.0; MAX_ADDITIONAL_LIGHTS],
        }
    }
}

impl FogLightParams {
    pub fn anisotropies(&self) -> &[f32; LIGHT_SLOTS] {
        &self.anisotropies
    }

    pub fn scatterings(&self) -> &[f32; LIGHT_SLOTS] {
        &self.scatterings
    }

    pub fn radii_sq(&self) -> &[f32; MAX_ADDITIONAL_LIGHTS] {
        &self.radii_sq
    }

    pub fn clear(&mut self) {
        self.anisotropies.fill(0.0);
        self.scatterings.fill(0.0);
        self.radii_sq.fill(0.0);
    }

    /// 重建数组并返回贡献标志
    /// Rebuilds the arrays for one view and returns the contribution flags
    pub fn rebuild(
        &mut self,
        lights: &VisibleLights,
        settings: &VolumetricFogSettings,
    ) -> LightContribution {
        self.clear();

        let visible_additional = lights.additional().count();
        if visible_additional > MAX_ADDITIONAL_LIGHTS {
            debug_once!(
                "{} additional lights visible, fog only reads the first {}",
                visible_additional,
                MAX_ADDITIONAL_LIGHTS
            );
        }

        let additional_count = lights.additional_count();
        let contribution = LightContribution {
            main: settings.enable_main_light_contribution
                && settings.scattering > 0.0
                && lights.main_light_index.is_some(),
            additional: settings.enable_additional_lights_contribution && additional_count > 0,
            additional_count,
        };

        if contribution.main {
            self.anisotropies[MAIN_LIGHT_SLOT] = settings.anisotropy;
            self.scatterings[MAIN_LIGHT_SLOT] = settings.scattering;
        }

        if contribution.additional {
            for (slot, light) in lights.additional().take(MAX_ADDITIONAL_LIGHTS).enumerate() {
                let params = light.contribution();
                self.anisotropies[slot] = params.anisotropy;
                self.scatterings[slot] = params.scattering;
                self.radii_sq[slot] = params.radius * params.radius;
            }
        }

        contribution
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(index: u32, kind: FogLightKind) -> LightCandidate {
        LightCandidate {
            entity: Entity::from_raw(index),
            kind,
            brightness: 1.0,
            visible: true,
            shadows_enabled: false,
            capability: None,
            active: true,
        }
    }

    fn with_capability(mut c: LightCandidate, params: VolumetricLightParams) -> LightCandidate {
        c.capability = Some(params);
        c
    }

    fn params(anisotropy: f32, scattering: f32, radius: f32) -> VolumetricLightParams {
        VolumetricLightParams {
            anisotropy,
            scattering,
            radius,
        }
    }

    fn fog_enabled() -> VolumetricFogSettings {
        VolumetricFogSettings {
            enabled: true,
            ..default()
        }
    }

    #[test]
    fn test_setters_clamp_independently() {
        let mut light = VolumetricFogLight::default();
        light.set_anisotropy(2.0);
        light.set_scattering(-3.0);
        light.set_radius(5.0);
        assert_eq!(light.anisotropy(), 1.0);
        assert_eq!(light.scattering(), 0.0);
        assert_eq!(light.radius(), 1.0);

        let light = VolumetricFogLight::new(-7.0, 40.0, 0.5);
        assert_eq!(light.params(), params(-1.0, MAX_SCATTERING, 0.5));
    }

    #[test]
    fn test_deserialized_light_is_clamped_before_binding() {
        let light: VolumetricFogLight = serde_json::from_str(
            r#"{ "enabled": true, "anisotropy": -9.0, "scattering": 100.0, "radius": 4.0 }"#,
        )
        .unwrap();
        assert_eq!(light.params(), params(-1.0, MAX_SCATTERING, 1.0));
        assert_eq!(light.sanitized().radius(), 1.0);
        assert!(light.sanitized().enabled);

        let lights = VisibleLights::collect([with_capability(
            candidate(0, FogLightKind::Point),
            light.params(),
        )]);
        let mut arrays = FogLightParams::default();
        arrays.rebuild(&lights, &fog_enabled());

        assert_eq!(arrays.anisotropies()[0], -1.0);
        assert_eq!(arrays.scatterings()[0], MAX_SCATTERING);
        assert_eq!(arrays.radii_sq()[0], 1.0);
    }

    #[test]
    fn test_brightest_directional_is_main_light() {
        let mut dim = candidate(1, FogLightKind::Directional);
        dim.brightness = 10.0;
        let mut bright = candidate(2, FogLightKind::Directional);
        bright.brightness = 1000.0;
        bright.shadows_enabled = true;

        let lights = VisibleLights::collect([candidate(0, FogLightKind::Point), dim, bright]);

        assert_eq!(lights.main_light_index, Some(0));
        assert_eq!(lights.lights[0].kind, FogLightKind::Directional);
        assert!(lights.main_light_shadows);
        assert!(!lights.additional_light_shadows);
        assert_eq!(lights.additional_count(), 2);
    }

    #[test]
    fn test_no_directional_means_no_main_light() {
        let lights = VisibleLights::collect([
            candidate(0, FogLightKind::Point),
            candidate(1, FogLightKind::Spot),
        ]);
        assert_eq!(lights.main_light_index, None);
        assert_eq!(lights.additional_count(), 2);

        let mut params = FogLightParams::default();
        let contribution = params.rebuild(&lights, &fog_enabled());
        assert!(!contribution.main);
        assert!(contribution.additional);
        assert_eq!(params.scatterings()[MAIN_LIGHT_SLOT], 0.0);
    }

    #[test]
    fn test_invisible_lights_are_dropped() {
        let mut hidden = candidate(3, FogLightKind::Point);
        hidden.visible = false;
        let lights = VisibleLights::collect([candidate(0, FogLightKind::Point), hidden]);
        assert_eq!(lights.lights.len(), 1);
    }

    #[test]
    fn test_main_light_fills_last_slot() {
        let lights = VisibleLights::collect([candidate(0, FogLightKind::Directional)]);
        let settings = VolumetricFogSettings {
            anisotropy: 0.6,
            scattering: 0.3,
            ..fog_enabled()
        };

        let mut params = FogLightParams::default();
        let contribution = params.rebuild(&lights, &settings);

        assert!(contribution.main);
        assert!(!contribution.additional);
        assert_eq!(params.anisotropies()[MAIN_LIGHT_SLOT], 0.6);
        assert_eq!(params.scatterings()[MAIN_LIGHT_SLOT], 0.3);
        assert!(params.radii_sq().iter().all(|r| *r == 0.0));
    }

    #[test]
    fn test_main_light_needs_scattering_and_toggle() {
        let lights = VisibleLights::collect([candidate(0, FogLightKind::Directional)]);
        let mut params = FogLightParams::default();

        let no_scattering = VolumetricFogSettings {
            scattering: 0.0,
            ..fog_enabled()
        };
        assert!(!params.rebuild(&lights, &no_scattering).main);

        let toggled_off = VolumetricFogSettings {
            enable_main_light_contribution: false,
            ..fog_enabled()
        };
        assert!(!params.rebuild(&lights, &toggled_off).main);
        assert_eq!(params.anisotropies()[MAIN_LIGHT_SLOT], 0.0);
    }

    #[test]
    fn test_lights_without_capability_are_zero() {
        let lights = VisibleLights::collect([
            candidate(0, FogLightKind::Directional),
            candidate(1, FogLightKind::Point),
            with_capability(candidate(2, FogLightKind::Point), params(0.5, 2.0, 0.5)),
            candidate(3, FogLightKind::Spot),
        ]);
        let mut fog = FogLightParams::default();
        let contribution = fog.rebuild(&lights, &fog_enabled());

        assert!(contribution.additional);
        assert_eq!(contribution.additional_count, 3);
        for slot in [0, 2] {
            assert_eq!(fog.anisotropies()[slot], 0.0);
            assert_eq!(fog.scatterings()[slot], 0.0);
            assert_eq!(fog.radii_sq()[slot], 0.0);
        }
        assert_eq!(fog.anisotropies()[1], 0.5);
        assert_eq!(fog.scatterings()[1], 2.0);
        assert_eq!(fog.radii_sq()[1], 0.25);
    }

    #[test]
    fn test_inactive_capability_is_zero() {
        let mut disabled = with_capability(candidate(1, FogLightKind::Point), params(0.5, 2.0, 0.5));
        disabled.active = false;
        let lights = VisibleLights::collect([disabled]);

        let mut fog = FogLightParams::default();
        fog.rebuild(&lights, &fog_enabled());
        assert_eq!(fog.scatterings()[0], 0.0);
        assert_eq!(fog.radii_sq()[0], 0.0);
    }

    #[test]
    fn test_no_capability_anywhere_still_contributes_flags() {
        let lights = VisibleLights::collect([
            candidate(0, FogLightKind::Directional),
            candidate(1, FogLightKind::Point),
        ]);
        let mut fog = FogLightParams::default();
        let contribution = fog.rebuild(&lights, &fog_enabled());
        assert!(contribution.additional);
        assert!(fog.radii_sq().iter().all(|r| *r == 0.0));
        assert!(fog.scatterings()[..MAX_ADDITIONAL_LIGHTS].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_additional_order_skips_main_once() {
        for k in 0..=MAX_ADDITIONAL_LIGHTS {
            let mut candidates = vec![candidate(1000, FogLightKind::Directional)];
            for i in 0..k {
                let scattering = (i + 1) as f32 / 100.0;
                candidates.push(with_capability(
                    candidate(i as u32, FogLightKind::Point),
                    params(0.0, scattering, 0.0),
                ));
            }
            let lights = VisibleLights::collect(candidates);
            let mut fog = FogLightParams::default();
            let contribution = fog.rebuild(&lights, &fog_enabled());

            assert_eq!(contribution.additional_count, k);
            for i in 0..k {
                assert_eq!(fog.scatterings()[i], (i + 1) as f32 / 100.0);
            }
            for i in k..MAX_ADDITIONAL_LIGHTS {
                assert_eq!(fog.scatterings()[i], 0.0);
            }
        }
    }

    #[test]
    fn test_lights_beyond_capacity_are_not_written() {
        let candidates = (0..(MAX_ADDITIONAL_LIGHTS as u32 + 5)).map(|i| {
            with_capability(candidate(i, FogLightKind::Point), params(0.1, 1.0, 1.0))
        });
        let lights = VisibleLights::collect(candidates);
        let mut fog = FogLightParams::default();
        let contribution = fog.rebuild(&lights, &fog_enabled());

        assert_eq!(contribution.additional_count, MAX_ADDITIONAL_LIGHTS);
        assert!(fog.radii_sq().iter().all(|r| *r == 1.0));
        assert_eq!(fog.scatterings()[MAIN_LIGHT_SLOT], 0.0);
    }

    #[test]
    fn test_stale_slots_are_zeroed_between_frames() {
        let mut fog = FogLightParams::default();
        let many = VisibleLights::collect((0..4).map(|i| {
            with_capability(candidate(i, FogLightKind::Spot), params(0.2, 3.0, 0.5))
        }));
        fog.rebuild(&many, &fog_enabled());
        assert_eq!(fog.scatterings()[3], 3.0);

        let few = VisibleLights::collect([with_capability(
            candidate(0, FogLightKind::Spot),
            params(0.2, 3.0, 0.5),
        )]);
        fog.rebuild(&few, &fog_enabled());
        assert_eq!(fog.scatterings()[0], 3.0);
        for slot in 1..4 {
            assert_eq!(fog.scatterings()[slot], 0.0);
            assert_eq!(fog.radii_sq()[slot], 0.0);
        }
    }

    #[test]
    fn test_disabled_additional_contribution_leaves_arrays_zero() {
        let lights = VisibleLights::collect([with_capability(
            candidate(0, FogLightKind::Point),
            params(0.2, 3.0, 0.5),
        )]);
        let settings = VolumetricFogSettings {
            enable_additional_lights_contribution: false,
            ..fog_enabled()
        };
        let mut fog = FogLightParams::default();
        let contribution = fog.rebuild(&lights, &settings);
        assert!(!contribution.additional);
        assert_eq!(fog, FogLightParams::default());
    }
}
