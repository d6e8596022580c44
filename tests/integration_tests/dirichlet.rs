//! Solves Dirichlet problems for the Laplace equation with the matrix-free operator and CG.
use fenris_matfree::cg::{ConjugateGradient, DirichletOperator, RelativeResidualCriterion};
use fenris_matfree::operator::{LaunchConfig, MatFreeLaplace};
use fenris_matfree::procedural::{create_box_hex_mesh, HexMesh};
use nalgebra::{DVector, Point3};
use util::{assert_approx_slice_eq, linear_combination};

fn linear_field(x: f64, y: f64, z: f64) -> f64 {
    1.0 + 2.0 * x - y + 0.5 * z
}

/// Solves $-\nabla \cdot (\kappa \nabla u) = 0$ with $u = g$ on the boundary, by lifting the
/// boundary values into the right-hand side.
fn solve_with_boundary_values(mesh: &HexMesh<f64>, kappa: f64, g: &[f64], config: LaunchConfig) -> Vec<f64> {
    let constants = [kappa];
    let view = mesh.view(&constants);
    let degree = mesh.degree().degree();
    let laplace = MatFreeLaplace::from_view(degree, &view)
        .unwrap()
        .with_launch_config(config)
        .unwrap();
    let dirichlet = DirichletOperator::new(&laplace, mesh.boundary_dofs());

    let mut g_boundary = vec![0.0; mesh.num_dofs()];
    for &dof in dirichlet.dofs() {
        g_boundary[dof] = g[dof];
    }

    // b = -A g_b on interior dofs, zero on boundary dofs
    let mut a_g = vec![0.0; mesh.num_dofs()];
    laplace.apply(&g_boundary, &mut a_g).unwrap();
    let mut b = -DVector::from_vec(a_g);
    dirichlet.zero_masked(b.as_mut_slice());

    let mut u0 = DVector::zeros(mesh.num_dofs());
    let output = ConjugateGradient::new()
        .with_operator(&dirichlet)
        .with_stopping_criterion(RelativeResidualCriterion::new(1e-12))
        .with_max_iter(1000)
        .solve_with_guess(&b, &mut u0)
        .unwrap();
    assert!(output.num_iterations > 0);

    for &dof in dirichlet.dofs() {
        assert_eq!(u0[dof], 0.0);
    }
    linear_combination(1.0, u0.as_slice(), 1.0, &g_boundary)
}

#[test]
fn linear_solution_is_reproduced_on_distorted_meshes() {
    for degree in [1, 2] {
        let mut mesh = create_box_hex_mesh([1.0, 0.8, 1.2], [3, 3, 3], degree).unwrap();
        mesh.perturb_interior_vertices(0.12);
        let g: Vec<f64> = mesh
            .dof_coordinates()
            .iter()
            .map(|p| linear_field(p.x, p.y, p.z))
            .collect();

        let u = solve_with_boundary_values(&mesh, 2.0, &g, LaunchConfig::default());
        assert_approx_slice_eq!(u, g, abstol = 1e-8);
    }
}

#[test]
fn solution_does_not_depend_on_launch_configuration() {
    let mesh = create_box_hex_mesh([1.0, 1.0, 1.0], [4, 3, 2], 2).unwrap();
    // Non-harmonic boundary data, so the interior solution is non-trivial
    let g: Vec<f64> = mesh
        .dof_coordinates()
        .iter()
        .map(|p: &Point3<f64>| (p.x * p.y).exp() + p.z * p.z)
        .collect();

    let sequential = solve_with_boundary_values(&mesh, 1.0, &g, LaunchConfig::sequential());
    let parallel = solve_with_boundary_values(
        &mesh,
        1.0,
        &g,
        LaunchConfig {
            block_size: 3,
            num_threads: Some(3),
        },
    );
    assert_approx_slice_eq!(parallel, sequential, abstol = 1e-9);
}
