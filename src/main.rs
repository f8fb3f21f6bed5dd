use bevy::prelude::*;
use pie_render::fly_camera::fly_projection;
use pie_render::{
    apply_settings_file, icosphere, unit_cube, unit_plane, DeferredCamera, DeferredLight,
    FlyCamera, FrameControl, PieRenderPlugins, PointShadowRegistry, SolidMaterial,
};

/// Optional settings file read at startup.
const SETTINGS_PATH: &str = "render_settings.json";

const ORBIT_RADIUS: f32 = 10.0;
const ORBIT_HEIGHT: f32 = 4.0;
const ORBIT_SPEED: f32 = 2.0;

/// Point light circling the origin; `direction` is +1 or -1.
#[derive(Component)]
struct Orbiting {
    direction: f32,
}

fn main() {
    let mut app = App::new();
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            title: "pie studio".into(),
            resolution: (800u32, 600u32).into(),
            ..default()
        }),
        ..default()
    }))
    .add_plugins(PieRenderPlugins::default())
    .add_systems(Startup, (load_settings, setup))
    .add_systems(Update, (orbit_lights, exit_on_escape));

    // `--frames N` renders N frames and exits.
    if let Some(limit) = frame_limit_arg() {
        app.insert_resource(FrameControl::frame_limit(limit));
    }

    app.run();
}

fn frame_limit_arg() -> Option<u64> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--frames" {
            return args.next().and_then(|value| value.parse().ok());
        }
    }
    None
}

fn load_settings(world: &mut World) {
    apply_settings_file(world, SETTINGS_PATH);
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut registry: ResMut<PointShadowRegistry>,
) {
    commands.spawn((
        Camera3d::default(),
        Msaa::Off,
        DeferredCamera,
        FlyCamera::default(),
        fly_projection(),
        Transform::from_xyz(0.0, 1.0, 5.0),
    ));

    // Ground
    commands.spawn((
        Mesh3d(meshes.add(unit_plane())),
        SolidMaterial::from_color(200, 200, 200, 64),
        Transform::from_scale(Vec3::new(100.0, 1.0, 100.0)),
    ));

    commands.spawn((
        Mesh3d(meshes.add(unit_cube())),
        SolidMaterial::from_color(255, 0, 0, 255),
        Transform::from_xyz(0.0, 0.5, 0.0).with_rotation(Quat::from_rotation_y(45f32.to_radians())),
    ));

    match icosphere(4, 0.5) {
        Ok(sphere) => {
            commands.spawn((
                Mesh3d(meshes.add(sphere)),
                SolidMaterial::from_color(240, 240, 240, 200),
                Transform::from_xyz(2.0, 0.5, -1.0),
            ));
        }
        Err(err) => warn!("Skipping sphere: {}", err),
    }

    commands.spawn(
        DeferredLight::directional(Color::srgb(0.6, 0.6, 0.6), Vec3::new(0.2, -1.0, 0.3))
            .with_shadows(),
    );

    for (color, direction) in [
        (Color::srgb(1.0, 0.0, 0.0), 1.0),
        (Color::srgb(0.0, 0.3, 1.0), -1.0),
    ] {
        let light = commands
            .spawn((
                DeferredLight::point(color, 15.0).with_shadows(),
                Orbiting { direction },
                Transform::from_xyz(ORBIT_RADIUS, ORBIT_HEIGHT, 0.0),
            ))
            .id();
        if let Err(err) = registry.assign(&mut commands, light) {
            warn!("Point light without shadows: {}", err);
        }
    }
}

fn orbit_lights(time: Res<Time>, mut lights: Query<(&Orbiting, &mut Transform)>) {
    let angle = time.elapsed_secs() * ORBIT_SPEED;
    for (orbiting, mut transform) in lights.iter_mut() {
        let angle = angle * orbiting.direction;
        transform.translation = Vec3::new(
            angle.cos() * ORBIT_RADIUS,
            ORBIT_HEIGHT,
            angle.sin() * ORBIT_RADIUS,
        );
    }
}

fn exit_on_escape(keys: Res<ButtonInput<KeyCode>>, mut exit: EventWriter<AppExit>) {
    if keys.just_pressed(KeyCode::Escape) {
        exit.write(AppExit::Success);
    }
}
