use bevy::prelude::*;
use bevy::render::extract_resource::ExtractResourcePlugin;

use crate::gate::{FogCamera, FogCameraKind, VolumetricFogFeature};
use crate::light::VolumetricFogLight;
use crate::render::VolumetricFogRenderPlugin;
use crate::settings::{FogRenderPassEvent, VolumetricFogSettings};
use crate::shader::{FogShaderPaths, FogShaders, verify_fog_shaders};

pub mod error;
pub mod gate;
pub mod light;
pub mod prelude;
pub mod render;
pub mod settings;
pub mod shader;
pub mod ssr;

/// 体积雾插件
/// Adds half-resolution volumetric fog to every 3D camera carrying [`VolumetricFogSettings`]
///
/// Shader paths are checked here; an invalid path aborts the app during setup.
#[derive(Default)]
pub struct VolumetricFogPlugin {
    pub shader_paths: FogShaderPaths,
}

impl Plugin for VolumetricFogPlugin {
    fn build(&self, app: &mut App) {
        if let Err(err) = self.shader_paths.validate() {
            error!("Volumetric fog setup failed: {err}");
            panic!("{err}");
        }

        app.register_type::<VolumetricFogSettings>()
            .register_type::<FogRenderPassEvent>()
            .register_type::<VolumetricFogLight>()
            .register_type::<FogCamera>()
            .register_type::<FogCameraKind>()
            .register_type::<VolumetricFogFeature>()
            .init_resource::<VolumetricFogFeature>();
        if !app.is_plugin_added::<ExtractResourcePlugin<VolumetricFogFeature>>() {
            app.add_plugins(ExtractResourcePlugin::<VolumetricFogFeature>::default());
        }

        let shaders = app
            .world()
            .get_resource::<AssetServer>()
            .map(|asset_server| FogShaders::load(asset_server, self.shader_paths.clone()));
        match shaders {
            Some(shaders) => {
                app.insert_resource(shaders)
                    .add_systems(Update, verify_fog_shaders);
            }
            None => warn!("No AssetServer, volumetric fog shaders not loaded"),
        }

        app.add_plugins(VolumetricFogRenderPlugin);

        info!(
            "Volumetric fog set up with shaders {:?} and {:?}",
            self.shader_paths.downsample_depth, self.shader_paths.volumetric_fog
        );
    }
}
