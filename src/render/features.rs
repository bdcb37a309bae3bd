use bevy::render::render_resource::ShaderDefVal;

use crate::light::LightContribution;
use crate::settings::VolumetricFogSettings;

pub const MAIN_LIGHT_CONTRIBUTION_DISABLED: &str = "MAIN_LIGHT_CONTRIBUTION_DISABLED";
pub const ADDITIONAL_LIGHTS_CONTRIBUTION_DISABLED: &str = "ADDITIONAL_LIGHTS_CONTRIBUTION_DISABLED";
pub const APV_CONTRIBUTION_ENABLED: &str = "APV_CONTRIBUTION_ENABLED";

/// 雾效着色器特性开关
/// Named feature flags of the fog render stage
///
/// Computed from configuration and the frame's contribution flags, then translated to
/// shader defs only when the pipeline is specialized. Each flag maps to exactly one def,
/// so a disabled keyword and its enabled counterpart can never both be on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FogShaderFeatures {
    pub main_light_contribution: bool,
    pub additional_lights_contribution: bool,
    pub apv_contribution: bool,
}

impl FogShaderFeatures {
    pub fn new(settings: &VolumetricFogSettings, contribution: &LightContribution) -> Self {
        Self {
            main_light_contribution: contribution.main,
            additional_lights_contribution: contribution.additional,
            apv_contribution: settings.enable_apv_contribution
                && settings.apv_contribution_weight > 0.0,
        }
    }

    pub fn shader_defs(&self) -> Vec<ShaderDefVal> {
        let mut defs = Vec::new();
        if !self.main_light_contribution {
            defs.push(MAIN_LIGHT_CONTRIBUTION_DISABLED.into());
        }
        if !self.additional_lights_contribution {
            defs.push(ADDITIONAL_LIGHTS_CONTRIBUTION_DISABLED.into());
        }
        if self.apv_contribution {
            defs.push(APV_CONTRIBUTION_ENABLED.into());
        }
        defs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::prelude::default;

    fn names(features: FogShaderFeatures) -> Vec<String> {
        features
            .shader_defs()
            .into_iter()
            .map(|def| match def {
                ShaderDefVal::Bool(name, _) => name,
                other => panic!("unexpected shader def {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_contributing_lights_clear_disabled_defs() {
        let features = FogShaderFeatures {
            main_light_contribution: true,
            additional_lights_contribution: true,
            apv_contribution: false,
        };
        assert!(names(features).is_empty());
    }

    #[test]
    fn test_no_contribution_sets_both_disabled_defs() {
        let defs = names(FogShaderFeatures::default());
        assert_eq!(
            defs,
            vec![
                MAIN_LIGHT_CONTRIBUTION_DISABLED.to_string(),
                ADDITIONAL_LIGHTS_CONTRIBUTION_DISABLED.to_string(),
            ]
        );
    }

    #[test]
    fn test_apv_needs_flag_and_weight() {
        let contribution = LightContribution::default();

        let weighted = VolumetricFogSettings {
            enable_apv_contribution: true,
            apv_contribution_weight: 0.5,
            ..default()
        };
        assert!(FogShaderFeatures::new(&weighted, &contribution).apv_contribution);

        let zero_weight = VolumetricFogSettings {
            apv_contribution_weight: 0.0,
            ..weighted.clone()
        };
        assert!(!FogShaderFeatures::new(&zero_weight, &contribution).apv_contribution);

        let flag_off = VolumetricFogSettings {
            enable_apv_contribution: false,
            ..weighted
        };
        assert!(!FogShaderFeatures::new(&flag_off, &contribution).apv_contribution);
    }

    #[test]
    fn test_features_follow_contribution() {
        let contribution = LightContribution {
            main: true,
            additional: false,
            additional_count: 0,
        };
        let features = FogShaderFeatures::new(&VolumetricFogSettings::default(), &contribution);
        assert!(features.main_light_contribution);
        assert!(!features.additional_lights_contribution);
        assert_eq!(
            names(features),
            vec![ADDITIONAL_LIGHTS_CONTRIBUTION_DISABLED.to_string()]
        );
    }
}
