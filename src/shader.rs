use bevy::asset::LoadState;
use bevy::prelude::*;

use crate::error::FogFeatureError;

pub const DEFAULT_DOWNSAMPLE_DEPTH_SHADER: &str = "shaders/downsample_depth.wgsl";
pub const DEFAULT_VOLUMETRIC_FOG_SHADER: &str = "shaders/volumetric_fog.wgsl";

/// 着色器资源路径
/// Asset paths of the two fog shaders
///
/// The depth shader provides the `downsample_depth` entry point. The fog shader provides
/// `fog_render`, `horizontal_blur`, `vertical_blur` and `upsample_composite`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FogShaderPaths {
    pub downsample_depth: String,
    pub volumetric_fog: String,
}

impl Default for FogShaderPaths {
    fn default() -> Self {
        Self {
            downsample_depth: DEFAULT_DOWNSAMPLE_DEPTH_SHADER.to_string(),
            volumetric_fog: DEFAULT_VOLUMETRIC_FOG_SHADER.to_string(),
        }
    }
}

impl FogShaderPaths {
    pub fn named(&self) -> [(&'static str, &str); 2] {
        [
            ("downsample depth", self.downsample_depth.as_str()),
            ("volumetric fog", self.volumetric_fog.as_str()),
        ]
    }

    /// 校验路径
    /// Rejects empty paths and paths that are not WGSL files
    pub fn validate(&self) -> Result<(), FogFeatureError> {
        for (name, path) in self.named() {
            if !is_wgsl_path(path) {
                return Err(FogFeatureError::InvalidShaderPath {
                    name,
                    path: path.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn is_wgsl_path(path: &str) -> bool {
    let path = path.trim();
    path.len() > ".wgsl".len() && path.ends_with(".wgsl")
}

/// 已加载的雾效着色器句柄
/// Strong handles to the fog shaders, shared by the main and render worlds
///
/// Dropped exactly once together with the world that owns the resource.
#[derive(Resource, Debug, Clone)]
pub struct FogShaders {
    pub paths: FogShaderPaths,
    pub downsample_depth: Handle<Shader>,
    pub volumetric_fog: Handle<Shader>,
}

impl FogShaders {
    pub fn load(asset_server: &AssetServer, paths: FogShaderPaths) -> Self {
        Self {
            downsample_depth: asset_server.load(paths.downsample_depth.clone()),
            volumetric_fog: asset_server.load(paths.volumetric_fog.clone()),
            paths,
        }
    }
}

/// 检查着色器加载状态, 失败视为致命错误
/// Fails the app when a fog shader cannot be loaded
///
/// Returns an error through Bevy's system error handler, which panics by default.
pub fn verify_fog_shaders(
    asset_server: Res<AssetServer>,
    shaders: Res<FogShaders>,
    mut verified: Local<bool>,
) -> bevy::ecs::error::Result {
    if *verified {
        return Ok(());
    }

    let handles = [
        ("downsample depth", &shaders.downsample_depth, &shaders.paths.downsample_depth),
        ("volumetric fog", &shaders.volumetric_fog, &shaders.paths.volumetric_fog),
    ];

    let mut all_loaded = true;
    for (name, handle, path) in handles {
        match asset_server.load_state(handle) {
            LoadState::Loaded => {}
            LoadState::Failed(err) => {
                error!("Volumetric fog shader {path:?} failed to load: {err}");
                return Err(FogFeatureError::ShaderLoadFailed {
                    name,
                    path: path.clone(),
                }
                .into());
            }
            _ => all_loaded = false,
        }
    }

    if all_loaded {
        debug!("Volumetric fog shaders loaded");
        *verified = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_are_valid() {
        assert_eq!(FogShaderPaths::default().validate(), Ok(()));
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let paths = FogShaderPaths {
            downsample_depth: String::new(),
            ..default()
        };
        assert_eq!(
            paths.validate(),
            Err(FogFeatureError::InvalidShaderPath {
                name: "downsample depth",
                path: String::new(),
            })
        );
    }

    #[test]
    fn test_non_wgsl_path_is_rejected() {
        let paths = FogShaderPaths {
            volumetric_fog: "shaders/volumetric_fog.glsl".to_string(),
            ..default()
        };
        assert!(matches!(
            paths.validate(),
            Err(FogFeatureError::InvalidShaderPath {
                name: "volumetric fog",
                ..
            })
        ));
        assert!(!is_wgsl_path(".wgsl"));
        assert!(is_wgsl_path("fog.wgsl"));
    }
}
