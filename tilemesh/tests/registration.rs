use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;
use tilemesh::affine_model::AffineModel;
use tilemesh::any_model::{AnyModel, ModelKind};
use tilemesh::model::{CoordinateTransform, InvertibleCoordinateTransform, Model, RansacParams};
use tilemesh::point::PointMatch;
use tilemesh::rigid_model::RigidModel;
use tilemesh::spring_mesh::{SpringMesh, SpringMeshParams};
use tilemesh::tile::TileGraph;
use tilemesh::tile_configuration::{OptimizeParams, TileConfiguration};
use tilemesh::transform_map::TransformMap;
use tilemesh::translation_model::TranslationModel;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grid(nx: usize, ny: usize, step: f64) -> Vec<[f64; 2]> {
    (0..nx * ny).map(|i| [(i % nx) as f64 * step, (i / nx) as f64 * step]).collect()
}

#[test]
fn affine_registration_survives_gross_outliers() {
    init_logging();
    let truth = AffineModel::new(1.05, -0.1, 12.0, 0.08, 0.97, -7.0);
    let mut rng = StdRng::seed_from_u64(42);

    let mut candidates: Vec<PointMatch> = grid(10, 6, 10.0)
        .into_iter()
        .map(|p| PointMatch::from_locations(p, truth.apply(p), 1.0))
        .collect();
    for _ in 0..20 {
        let p = [rng.random_range(0.0..90.0), rng.random_range(0.0..50.0)];
        let q = truth.apply(p);
        let angle: f64 = rng.random_range(0.0..std::f64::consts::TAU);
        let r = rng.random_range(20.0..50.0);
        candidates.push(PointMatch::from_locations(p, [q[0] + r * angle.cos(), q[1] + r * angle.sin()], 1.0));
    }

    let params = RansacParams { iterations: 500, max_epsilon: 2.0, min_inlier_ratio: 0.1, min_num_inliers: 7, max_trust: 4.0 };
    let mut model = AnyModel::from_kind(ModelKind::Affine);
    let inliers = model
        .filter_ransac(&candidates, &params, &mut rng)
        .unwrap()
        .expect("consensus");

    assert_eq!(inliers.len(), 60);
    for query in [[0.0, 0.0], [45.0, 25.0], [120.0, -30.0]] {
        let a = model.apply(query);
        let b = truth.apply(query);
        assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-6);
        assert_abs_diff_eq!(a[1], b[1], epsilon = 1e-6);
    }
}

#[test]
fn rigid_sections_are_chained_from_a_fixed_one() {
    init_logging();
    let poses = [RigidModel::default(), RigidModel::new(0.1, 50.0, 0.0), RigidModel::new(-0.05, 100.0, 5.0)];

    // world points seen by two neighbouring sections, expressed in each section's frame
    let overlap = |a: &RigidModel, b: &RigidModel, x0: f64| -> Vec<PointMatch> {
        grid(3, 4, 10.0)
            .into_iter()
            .map(|p| {
                let world = [p[0] + x0, p[1]];
                PointMatch::from_locations(
                    a.apply_inverse(world).unwrap(),
                    b.apply_inverse(world).unwrap(),
                    1.0,
                )
            })
            .collect()
    };

    let mut graph = TileGraph::new();
    let ids: Vec<_> = poses.iter().map(|_| graph.add_tile(RigidModel::default())).collect();
    graph.connect(ids[0], ids[1], &overlap(&poses[0], &poses[1], 55.0));
    graph.connect(ids[1], ids[2], &overlap(&poses[1], &poses[2], 105.0));
    assert_eq!(graph.identify_connected_graphs().len(), 1);

    let mut configuration = TileConfiguration::new(graph);
    configuration.fix_tile(ids[0]);
    assert!(configuration.pre_align().unwrap().is_empty());
    let params = OptimizeParams { max_allowed_error: 1.0, max_iterations: 500, max_plateau_width: 20 };
    let convergence = configuration.optimize(&params).unwrap();
    assert!(convergence.converged);
    assert!(convergence.error < 1e-6);

    for (id, pose) in ids.iter().zip(&poses) {
        let model = configuration.graph().tile(*id).model();
        for query in [[0.0, 0.0], [30.0, 40.0]] {
            let a = model.apply(query);
            let b = pose.apply(query);
            assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-6);
            assert_abs_diff_eq!(a[1], b[1], epsilon = 1e-6);
        }
    }
}

#[test]
fn spring_mesh_export_round_trips_through_the_binary_map() {
    init_logging();
    let shift = TranslationModel::new(5.0, -3.0);
    let mut mesh = SpringMesh::new(&SpringMeshParams { resolution: 4, ..Default::default() }, 60.0, 60.0);
    for v in 0..mesh.num_vertices() {
        let source = mesh.mesh().source(v);
        mesh.attach(v, shift.apply(source), 1.0);
    }

    let params = OptimizeParams { max_allowed_error: 1.0, max_iterations: 300, max_plateau_width: 20 };
    let mut rng = StdRng::seed_from_u64(3);
    let convergence = mesh.optimize(&params, &mut rng).unwrap();
    assert!(convergence.converged);
    assert!(convergence.iterations < params.max_iterations);
    assert!(convergence.error < 1e-2);

    let relaxed = mesh.into_mesh();
    for v in 0..relaxed.num_vertices() {
        let expected = shift.apply(relaxed.source(v));
        let q = relaxed.target(v);
        assert!((q[0] - expected[0]).hypot(q[1] - expected[1]) < 1e-2);
    }

    let map = TransformMap::from_mesh(&relaxed, 60, 60);
    assert!(map.used_area() > 0.5);

    let mut bytes = Vec::new();
    map.write_to(&mut bytes).unwrap();
    let read = TransformMap::read_from(&mut Cursor::new(&bytes)).unwrap();
    let mut again = Vec::new();
    read.write_to(&mut again).unwrap();
    assert_eq!(bytes, again);
    assert_eq!((read.width(), read.height()), (60, 60));
}
