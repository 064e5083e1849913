use std::sync::{atomic::Ordering, Arc};
use std::time::{Duration, Instant};

use argh::FromArgs;
use nalgebra::{Point3, Vector3};
use retinas::{
    DetectionSource, Pose, RigConfig, Runner, RunnerOptions, Scene, SyntheticSource, WorldPoses,
};

/// Fuses a simulated multi-camera rig and prints the estimated poses
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the rig description
    #[argh(option, short = 'c', default = "String::from(\"demos/synthetic_rig/rig.json\")")]
    config: String,

    /// how long to run, in seconds
    #[argh(option, short = 'd', default = "5.0")]
    duration: f64,

    /// minimum fusion period in milliseconds, overrides the rig file
    #[argh(option, short = 'p')]
    period_ms: Option<u64>,

    /// stop after this many frames
    #[argh(option, short = 'n')]
    frames: Option<u64>,

    /// uniform pixel noise added to every detection
    #[argh(option, default = "0.3")]
    noise: f64,

    /// distance of the cameras from the rig centre, in meters
    #[argh(option, default = "1.5")]
    radius: f64,
}

/// Where the non-reference bodies sit at time `t`.
fn body_pose(index: usize, count: usize, t: f64) -> Pose {
    let phase = index as f64 * std::f64::consts::TAU / count.max(1) as f64;
    let angle = phase + 0.3 * t;
    Pose::from_rodrigues(
        &Vector3::new(0.0, 0.0, angle),
        &Vector3::new(0.4 * angle.cos(), 0.4 * angle.sin(), 0.05),
    )
}

fn describe(pose: Option<&Pose>, truth: Option<Pose>) -> String {
    match (pose, truth) {
        (Some(pose), Some(truth)) => {
            let t = pose.translation();
            let offset = (t - truth.translation()).norm();
            format!("[{:+.3} {:+.3} {:+.3}] off {:.1} mm", t.x, t.y, t.z, offset * 1e3)
        }
        (Some(pose), None) => {
            let t = pose.translation();
            format!("[{:+.3} {:+.3} {:+.3}]", t.x, t.y, t.z)
        }
        (None, _) => "unknown".to_string(),
    }
}

fn report(rig: &RigConfig, poses: &WorldPoses, scene: &Scene, cameras: &[Pose], hz: f64) {
    log::info!("frame {} ({hz:.1} Hz)", poses.frame);
    for (i, body) in rig.bodies.iter().enumerate() {
        log::info!("  body   {:<8} {}", body.name, describe(poses.body(i), scene.pose(i)));
    }
    for (j, camera) in rig.cameras.iter().enumerate() {
        let truth = cameras.get(j).copied();
        log::info!("  camera {:<8} {}", camera.name, describe(poses.camera(j), truth));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let rig = RigConfig::from_json_file(&args.config)?;
    let engine = rig.build_engine()?;

    // the reference body stays at the world origin, the others circle around it
    let num_bodies = rig.bodies.len();
    let reference = rig.fusion.reference_body;
    let poses = (0..num_bodies)
        .map(|i| {
            if i == reference {
                Pose::identity()
            } else {
                body_pose(i, num_bodies, 0.0)
            }
        })
        .collect();
    let scene = Scene::new(engine.bodies().to_vec(), poses);

    // cameras on a ring above the rig, all looking at the centre
    let num_cameras = engine.num_cameras();
    let mut camera_poses = Vec::with_capacity(num_cameras);
    let mut sources: Vec<Box<dyn DetectionSource>> = Vec::with_capacity(num_cameras);
    for (j, camera) in engine.cameras().iter().enumerate() {
        let angle = j as f64 * std::f64::consts::TAU / num_cameras as f64;
        let eye = Point3::new(args.radius * angle.cos(), args.radius * angle.sin(), 1.2);
        let pose = Pose::look_at(&eye, &Point3::origin(), &Vector3::z())
            .ok_or("camera looks straight along the up axis")?;
        let width = 2.0 * camera.model.intrinsics.cx;
        let height = 2.0 * camera.model.intrinsics.cy;
        let source = SyntheticSource::new(Arc::clone(&scene), camera.model.clone(), pose)
            .with_image_size(width, height)
            .with_noise(args.noise, j as u64)
            // every camera loses sight now and then
            .with_dropout(50 + 7 * j as u64, 5);
        camera_poses.push(pose);
        sources.push(Box::new(source));
    }

    let mut options: RunnerOptions = rig.runner.clone();
    if let Some(period) = args.period_ms {
        options = options.with_min_period(Duration::from_millis(period));
    }
    if let Some(frames) = args.frames {
        options = options.with_max_frames(frames);
    }

    let runner = Runner::spawn(engine, sources, options)?;
    let board = runner.board();

    ctrlc::set_handler({
        let shutdown = runner.shutdown_flag();
        move || {
            println!("Received Ctrl-C signal. Stopping the fusion worker !!");
            shutdown.store(true, Ordering::SeqCst);
        }
    })?;
    let shutdown = runner.shutdown_flag();

    let start = Instant::now();
    let mut last_report = Instant::now();
    while !shutdown.load(Ordering::SeqCst)
        && !runner.is_finished()
        && start.elapsed().as_secs_f64() < args.duration
    {
        let t = start.elapsed().as_secs_f64();
        for i in (0..num_bodies).filter(|&i| i != reference) {
            scene.set_pose(i, body_pose(i, num_bodies, t));
        }

        if last_report.elapsed() >= Duration::from_millis(500) {
            report(&rig, &board.snapshot(), &scene, &camera_poses, board.cycles_per_second());
            last_report = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    runner.stop()?;
    report(&rig, &board.snapshot(), &scene, &camera_poses, board.cycles_per_second());

    println!("Finished fusing. Closing app.");

    Ok(())
}
