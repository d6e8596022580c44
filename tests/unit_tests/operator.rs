use fenris_matfree::error::{ConfigurationError, MeshError, OperatorError};
use fenris_matfree::mesh::HexMeshView;
use fenris_matfree::operator::{LaunchConfig, MatFreeLaplace};
use fenris_matfree::procedural::{create_box_hex_mesh, create_unit_box_hex_mesh, HexMesh};
use fenris_matfree::proptest::{hex_mesh_with_fields, HexMeshParams};
use fenris_matfree::tables::HexDegree;
use proptest::prelude::*;
use util::{assert_approx_slice_eq, dot, linear_combination, max_abs};

fn apply(operator: &MatFreeLaplace<f64>, u: &[f64]) -> Vec<f64> {
    let mut y = vec![0.0; u.len()];
    operator.apply(u, &mut y).unwrap();
    y
}

fn perturbed_mesh(cells: [usize; 3], degree: usize) -> HexMesh<f64> {
    let mut mesh = create_box_hex_mesh([1.0, 1.5, 0.75], cells, degree).unwrap();
    mesh.perturb_interior_vertices(0.12);
    mesh
}

#[test]
fn single_unit_cube_with_constant_field_gives_zero() {
    // Corners of the unit cube in local order, and a trilinear field equal to one everywhere
    let mut x = Vec::new();
    for c in 0..8 {
        x.extend_from_slice(&[(c / 4) as f64, ((c / 2) % 2) as f64, (c % 2) as f64]);
    }
    let x_dofmap: Vec<usize> = (0..8).collect();
    let dofmap: Vec<usize> = (0..8).collect();
    let constants = [1.0];
    let laplace = MatFreeLaplace::new(1, 1, &constants, &x, &x_dofmap, &dofmap).unwrap();

    let u = vec![1.0; 8];
    let y = apply(&laplace, &u);
    assert!(max_abs(&y) < 1e-14);
}

#[test]
fn constant_field_is_in_kernel_on_distorted_meshes() {
    for degree in [1, 2] {
        let mesh = perturbed_mesh([3, 2, 2], degree);
        let constants = [3.0];
        let laplace = MatFreeLaplace::from_view(degree, &mesh.view(&constants)).unwrap();
        let y = apply(&laplace, &vec![-2.5; mesh.num_dofs()]);
        assert!(max_abs(&y) < 1e-12, "degree {}: {:e}", degree, max_abs(&y));
    }
}

#[test]
fn output_is_accumulated() {
    let mesh = create_unit_box_hex_mesh::<f64>(2, 2).unwrap();
    let constants = [1.0];
    let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants)).unwrap();
    let u: Vec<f64> = (0..mesh.num_dofs()).map(|i| (i as f64).sin()).collect();

    let y = apply(&laplace, &u);
    let mut accumulated = vec![1.0; mesh.num_dofs()];
    laplace.apply(&u, &mut accumulated).unwrap();
    laplace.apply(&u, &mut accumulated).unwrap();
    let expected = linear_combination(2.0, &y, 1.0, &vec![1.0; mesh.num_dofs()]);
    assert_approx_slice_eq!(accumulated, expected, abstol = 1e-13);
}

#[test]
fn material_constant_scales_output() {
    let mesh = perturbed_mesh([2, 2, 2], 1);
    let u: Vec<f64> = (0..mesh.num_dofs()).map(|i| (0.3 * i as f64).cos()).collect();
    let unit = [1.0];
    let scaled = [4.0];
    let y1 = apply(&MatFreeLaplace::from_view(1, &mesh.view(&unit)).unwrap(), &u);
    let y4 = apply(&MatFreeLaplace::from_view(1, &mesh.view(&scaled)).unwrap(), &u);
    let expected: Vec<f64> = y1.iter().map(|y| 4.0 * y).collect();
    assert_approx_slice_eq!(y4, expected, abstol = 1e-12);
}

#[test]
fn parallel_apply_matches_sequential_apply() {
    let mesh = perturbed_mesh([4, 3, 3], 2);
    let constants = [1.7];
    let view = mesh.view(&constants);
    let u: Vec<f64> = (0..mesh.num_dofs()).map(|i| ((i * 7919) % 101) as f64 / 50.0 - 1.0).collect();

    let sequential = MatFreeLaplace::from_view(2, &view)
        .unwrap()
        .with_launch_config(LaunchConfig::sequential())
        .unwrap();
    let expected = apply(&sequential, &u);

    // Block sizes that do and do not divide the number of cells
    for block_size in [1, 5, 7, 36, 256] {
        let config = LaunchConfig {
            block_size,
            num_threads: Some(4),
        };
        let parallel = MatFreeLaplace::from_view(2, &view)
            .unwrap()
            .with_launch_config(config.clone())
            .unwrap();
        assert_eq!(parallel.launch_config(), &config);
        assert_approx_slice_eq!(apply(&parallel, &u), expected, reltol = 1e-13);
    }

    let global_pool = MatFreeLaplace::from_view(2, &view).unwrap();
    assert_approx_slice_eq!(apply(&global_pool, &u), expected, reltol = 1e-13);
}

#[test]
fn single_precision_operator() {
    let mesh = create_unit_box_hex_mesh::<f32>(2, 2).unwrap();
    let constants = [1.0f32];
    let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants)).unwrap();
    let u = vec![1.0f32; mesh.num_dofs()];
    let mut y = vec![0.0f32; mesh.num_dofs()];
    laplace.apply(&u, &mut y).unwrap();
    assert!(max_abs(&y) < 1e-4);
}

#[test]
fn accessors() {
    let mesh = create_box_hex_mesh([1.0, 1.0, 1.0], [3, 2, 1], 2).unwrap();
    let constants = [1.0];
    let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants)).unwrap();
    assert_eq!(laplace.degree(), HexDegree::Q2);
    assert_eq!(laplace.num_cells(), 6);
    assert_eq!(laplace.nodes_per_cell(), 27);
    assert_eq!(laplace.num_dofs_required(), mesh.num_dofs());
    assert_eq!(laplace.launch_config(), &LaunchConfig::default());
    assert_eq!(laplace.launch_config().block_size, 256);
}

#[test]
fn empty_mesh_leaves_output_untouched() {
    let constants = [1.0];
    let view = HexMeshView::<f64> {
        num_cells: 0,
        constants: &constants,
        x: &[],
        x_dofmap: &[],
        dofmap: &[],
    };
    let laplace = MatFreeLaplace::from_view(1, &view).unwrap();
    let mut y = vec![3.0; 4];
    laplace.apply(&[1.0; 4], &mut y).unwrap();
    assert_eq!(y, vec![3.0; 4]);
}

#[test]
fn unsupported_degree_is_a_configuration_error() {
    let mesh = create_unit_box_hex_mesh::<f64>(1, 1).unwrap();
    let constants = [1.0];
    for degree in [0, 3, 4] {
        let err = MatFreeLaplace::from_view(degree, &mesh.view(&constants)).unwrap_err();
        assert_eq!(
            err,
            OperatorError::Configuration(ConfigurationError::UnsupportedDegree { degree })
        );
    }
}

#[test]
fn zero_block_size_is_rejected() {
    let mesh = create_unit_box_hex_mesh::<f64>(1, 1).unwrap();
    let constants = [1.0];
    let config = LaunchConfig {
        block_size: 0,
        num_threads: None,
    };
    let err = MatFreeLaplace::from_view(1, &mesh.view(&constants))
        .unwrap()
        .with_launch_config(config)
        .unwrap_err();
    assert_eq!(err, OperatorError::Configuration(ConfigurationError::InvalidBlockSize));
}

#[test]
fn vector_lengths_are_checked() {
    let mesh = create_unit_box_hex_mesh::<f64>(2, 1).unwrap();
    let constants = [1.0];
    let laplace = MatFreeLaplace::from_view(1, &mesh.view(&constants)).unwrap();

    let mut y = vec![0.0; 26];
    assert_eq!(
        laplace.apply(&[0.0; 27], &mut y),
        Err(OperatorError::DimensionMismatch { input: 27, output: 26 })
    );
    assert_eq!(
        laplace.apply(&[0.0; 26], &mut y),
        Err(OperatorError::Mesh(MeshError::FieldIndexOutOfBounds { required: 27, len: 26 }))
    );

    // Longer vectors are fine, trailing entries are not touched
    let mut y = vec![5.0; 30];
    laplace.apply(&[0.0; 30], &mut y).unwrap();
    assert_eq!(&y[27..], &[5.0; 3]);
}

#[test]
fn diagonal_matches_operator_applied_to_unit_vectors() {
    let mesh = perturbed_mesh([2, 1, 2], 2);
    let constants = [1.3];
    let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants))
        .unwrap()
        .with_launch_config(LaunchConfig {
            block_size: 1,
            num_threads: Some(2),
        })
        .unwrap();

    let n = mesh.num_dofs();
    let mut diagonal = vec![0.0; n];
    laplace.diagonal(&mut diagonal).unwrap();
    for i in 0..n {
        let mut e_i = vec![0.0; n];
        e_i[i] = 1.0;
        let column = apply(&laplace, &e_i);
        assert!((diagonal[i] - column[i]).abs() < 1e-12 * (1.0 + column[i].abs()));
    }

    // Accumulates like apply
    let mut accumulated = vec![1.0; n];
    laplace.diagonal(&mut accumulated).unwrap();
    let expected = linear_combination(1.0, &diagonal, 1.0, &vec![1.0; n]);
    assert_approx_slice_eq!(accumulated, expected, abstol = 1e-13);

    let mut short = vec![0.0; n - 1];
    assert_eq!(
        laplace.diagonal(&mut short),
        Err(OperatorError::Mesh(MeshError::FieldIndexOutOfBounds { required: n, len: n - 1 }))
    );
}

#[test]
fn inverted_mesh_is_rejected_unless_unchecked() {
    let mesh = perturbed_mesh([2, 2, 2], 1);
    let constants = [1.0];
    // Mirroring all coordinates inverts every cell without changing the operator
    let mirrored: Vec<f64> = mesh
        .coordinates()
        .chunks_exact(3)
        .flat_map(|x| [-x[0], x[1], x[2]])
        .collect();
    let mirrored_view = HexMeshView {
        x: &mirrored,
        ..mesh.view(&constants)
    };

    let err = MatFreeLaplace::from_view(1, &mirrored_view).unwrap_err();
    assert!(matches!(err, OperatorError::Mesh(MeshError::InvertedCell { cell: 0, .. })));

    let unchecked = MatFreeLaplace::from_view_unchecked_geometry(1, &mirrored_view).unwrap();
    let reference = MatFreeLaplace::from_view(1, &mesh.view(&constants)).unwrap();
    let u: Vec<f64> = (0..mesh.num_dofs()).map(|i| i as f64 * 0.1).collect();
    assert_approx_slice_eq!(apply(&unchecked, &u), apply(&reference, &u), reltol = 1e-13);
}

#[test]
fn launch_config_from_json() {
    let config: LaunchConfig = serde_json::from_str(r#"{ "block_size": 64 }"#).unwrap();
    assert_eq!(
        config,
        LaunchConfig {
            block_size: 64,
            num_threads: None
        }
    );

    let config: LaunchConfig = serde_json::from_str(r#"{ "num_threads": 2 }"#).unwrap();
    assert_eq!(config.block_size, 256);
    assert_eq!(config.num_threads, Some(2));

    let config: LaunchConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, LaunchConfig::default());
    assert_eq!(config.num_blocks(513), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn apply_is_linear(
        (mesh, u, v) in hex_mesh_with_fields(HexMeshParams::default().with_max_cells_per_dim(2)),
        a in -2.0..2.0,
        b in -2.0..2.0
    ) {
        let constants = [1.0];
        let laplace = MatFreeLaplace::from_view(1, &mesh.view(&constants)).unwrap();
        let combined = apply(&laplace, &linear_combination(a, &u, b, &v));
        let expected = linear_combination(a, &apply(&laplace, &u), b, &apply(&laplace, &v));
        let scale = 1.0 + max_abs(&expected);
        assert_approx_slice_eq!(combined, expected, abstol = 1e-12 * scale);
    }

    #[test]
    fn apply_is_symmetric(
        (mesh, u, v) in hex_mesh_with_fields(
            HexMeshParams::default()
                .with_degree(HexDegree::Q2)
                .with_max_cells_per_dim(2)
        )
    ) {
        let constants = [0.8];
        let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants)).unwrap();
        let v_dot_au = dot(&v, &apply(&laplace, &u));
        let u_dot_av = dot(&u, &apply(&laplace, &v));
        let scale = 1.0 + v_dot_au.abs().max(u_dot_av.abs());
        prop_assert!((v_dot_au - u_dot_av).abs() <= 1e-11 * scale, "{} vs {}", v_dot_au, u_dot_av);
    }

    #[test]
    fn energy_is_non_negative(
        (mesh, u, _) in hex_mesh_with_fields(HexMeshParams::default())
    ) {
        let constants = [1.0];
        let laplace = MatFreeLaplace::from_view(1, &mesh.view(&constants)).unwrap();
        let energy = dot(&u, &apply(&laplace, &u));
        prop_assert!(energy >= -1e-10);
    }
}
