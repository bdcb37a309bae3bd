pub use crate::{
    VolumetricFogPlugin,
    error::{FogFeatureError, FogPlanError},
    gate::{FogCamera, FogCameraKind, VolumetricFogFeature},
    light::VolumetricFogLight,
    render::{VolumetricFogLabel, VolumetricFogRenderPlugin},
    settings::{FogRenderPassEvent, VolumetricFogSettings},
    shader::{FogShaderPaths, FogShaders},
    ssr::{ScreenSpaceReflectionPlugin, ScreenSpaceReflectionSettings},
};

#[cfg(feature = "format-json")]
pub use crate::error::FogProfileError;
