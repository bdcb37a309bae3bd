use bevy::prelude::*;
use bevy_volumetric_fog::prelude::*;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(VolumetricFogPlugin::default())
        .add_systems(Startup, setup)
        .add_systems(Update, toggle_fog)
        .run();
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Camera3d::default(),
        Transform::from_xyz(-12.0, 6.0, 18.0).looking_at(Vec3::new(0.0, 2.0, 0.0), Vec3::Y),
        VolumetricFogSettings {
            enabled: true,
            density: 0.35,
            maximum_height: 12.0,
            enable_ground: true,
            ground_height: 0.0,
            tint: Color::srgb(0.85, 0.9, 1.0),
            ..default()
        },
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(4.0, 10.0, 2.0).looking_at(Vec3::ZERO, Vec3::Y),
        VolumetricFogLight::default(),
    ));

    commands.spawn((
        PointLight {
            intensity: 200_000.0,
            range: 20.0,
            color: Color::srgb(1.0, 0.6, 0.3),
            ..default()
        },
        Transform::from_xyz(0.0, 3.0, 0.0),
        VolumetricFogLight::new(0.6, 4.0, 0.3),
    ));

    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(60.0, 60.0))),
        MeshMaterial3d(materials.add(Color::srgb(0.3, 0.32, 0.3))),
    ));
    for i in 0..5 {
        commands.spawn((
            Mesh3d(meshes.add(Cuboid::new(1.5, 6.0, 1.5))),
            MeshMaterial3d(materials.add(Color::srgb(0.6, 0.6, 0.65))),
            Transform::from_xyz(-8.0 + i as f32 * 4.0, 3.0, -4.0),
        ));
    }
}

fn toggle_fog(keys: Res<ButtonInput<KeyCode>>, mut fogs: Query<&mut VolumetricFogSettings>) {
    if keys.just_pressed(KeyCode::Space) {
        for mut fog in &mut fogs {
            fog.enabled = !fog.enabled;
        }
    }
}
