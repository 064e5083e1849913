use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nalgebra::{Point3, Vector3};
use retinas::{
    Body, Camera, DetectionSource, FusionConfig, FusionEngine, Observation, PathPolicy, Pose,
    Scene, SyntheticSource,
};

/// A ring of `num_cameras` cameras around a floor board and `num_bodies - 1` tagged boxes.
fn ring_rig(num_cameras: usize, num_bodies: usize) -> (Vec<Body>, Vec<Camera>, Vec<Observation>) {
    let mut bodies = vec![Body::new("floor").with_marker(0, 0.3, &Pose::identity())];
    let mut poses = vec![Pose::identity()];
    for i in 1..num_bodies {
        let angle = i as f64 * std::f64::consts::TAU / num_bodies as f64;
        bodies.push(Body::new(format!("box{i}")).with_marker(i as u32, 0.1, &Pose::identity()));
        poses.push(Pose::from_rodrigues(
            &Vector3::new(0.0, 0.0, angle),
            &Vector3::new(0.5 * angle.cos(), 0.5 * angle.sin(), 0.05),
        ));
    }
    let scene = Scene::new(bodies.clone(), poses);

    let mut cameras = Vec::with_capacity(num_cameras);
    let mut observations = Vec::with_capacity(num_cameras);
    for j in 0..num_cameras {
        let angle = j as f64 * std::f64::consts::TAU / num_cameras as f64;
        let eye = Point3::new(1.5 * angle.cos(), 1.5 * angle.sin(), 1.2);
        let pose = Pose::look_at(&eye, &Point3::origin(), &Vector3::z()).unwrap();
        let camera = Camera::pinhole(format!("cam{j}"), 800.0, 800.0, 640.0, 480.0);
        let mut source = SyntheticSource::new(scene.clone(), camera.model.clone(), pose)
            .with_image_size(1280.0, 960.0)
            .with_noise(0.3, j as u64);
        observations.push(source.observe());
        cameras.push(camera);
    }
    (bodies, cameras, observations)
}

fn bench_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("fusion_process");
    for &(num_cameras, num_bodies) in &[(2usize, 2usize), (4, 6), (8, 12)] {
        let (bodies, cameras, observations) = ring_rig(num_cameras, num_bodies);
        let detections: usize = observations.iter().map(Observation::len).sum();
        group.throughput(Throughput::Elements(detections as u64));

        for policy in [PathPolicy::HopCount, PathPolicy::Confidence] {
            let config = FusionConfig {
                path_policy: policy,
                ..Default::default()
            };
            let mut engine = FusionEngine::new(bodies.clone(), cameras.clone(), config).unwrap();
            let id = BenchmarkId::new(
                format!("{policy:?}"),
                format!("{num_cameras}c_{num_bodies}b"),
            );
            group.bench_with_input(id, &observations, |b, observations| {
                b.iter(|| {
                    let estimate = engine.process(observations).unwrap();
                    std::hint::black_box(estimate);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_process);
criterion_main!(benches);
