use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use nalgebra::{Rotation3, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use retinas_pnp as rpnp;

type PnpDataset = (Vec<[f64; 3]>, Vec<[f64; 2]>, rpnp::CameraModel);

fn generate_cube_dataset_with_seed(num_points: usize, noise_px: f64, seed: u64) -> PnpDataset {
    let camera = rpnp::CameraModel::pinhole(rpnp::CameraIntrinsics::new(800.0, 800.0, 640.0, 480.0));

    // points in a 1m cube around z in [3,6]
    let mut world = Vec::with_capacity(num_points);
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..num_points {
        world.push([
            rng.random_range(-0.5..0.5),
            rng.random_range(-0.5..0.5),
            rng.random_range(3.0..6.0),
        ]);
    }

    let r = Rotation3::new(Vector3::new(0.05, 0.26, 0.12)).into_inner();
    let t = Vector3::new(0.2, -0.1, 0.3);

    let image = world
        .iter()
        .filter_map(|p| camera.project(&(r * Vector3::from(*p) + t)))
        .map(|uv| {
            [
                uv[0] + rng.random_range(-noise_px..noise_px),
                uv[1] + rng.random_range(-noise_px..noise_px),
            ]
        })
        .collect();

    (world, image, camera)
}

fn generate_tag_dataset(side: f64) -> PnpDataset {
    let camera = rpnp::CameraModel::default();
    let h = side / 2.0;
    let world = vec![[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]];
    let r = Rotation3::new(Vector3::new(0.3, -0.2, 0.1)).into_inner();
    let t = Vector3::new(0.05, 0.0, 1.0);
    let image = world
        .iter()
        .filter_map(|p| camera.project(&(r * Vector3::from(*p) + t)))
        .collect();
    (world, image, camera)
}

fn bench_epnp(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_epnp");
    for &n in &[8usize, 32, 128, 512, 2048] {
        let (world, image, camera) = generate_cube_dataset_with_seed(n, 0.5, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let method = rpnp::PnPMethod::EPnP(rpnp::EPnPParams::default());
                let res = rpnp::solve_pnp(&world, &image, &camera, method).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_planar(c: &mut Criterion) {
    let mut group = c.benchmark_group("pnp_planar");
    let (world, image, camera) = generate_tag_dataset(0.1);
    for (name, params) in [
        ("linear", rpnp::PlanarParams { refine_lm: None, ..Default::default() }),
        ("refined", rpnp::PlanarParams::default()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let res = rpnp::solve_pnp(
                    &world,
                    &image,
                    &camera,
                    rpnp::PnPMethod::Planar(params.clone()),
                )
                .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_epnp, bench_planar);
criterion_main!(benches);
