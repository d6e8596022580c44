use super::{reference_unit_cube_stiffness, unit_cube_coordinates};
use fenris_matfree::gather::{flatten_cell_tensor, CellCoordinates};
use fenris_matfree::kernel::{
    compute_weighted_flux, evaluate_jacobian, evaluate_reference_gradient, invert_jacobian, jacobian_determinant,
    tabulate_cell, tabulate_cell_diagonal, CellInputs, HexKernel,
};
use fenris_matfree::tables::{HexDegree, Q1Tables, Q2Tables, TensorTables};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use proptest::prelude::*;

fn affine_coordinates(a: &Matrix3<f64>, b: &Vector3<f64>) -> CellCoordinates<f64> {
    unit_cube_coordinates().map(|xi| {
        let x = a * Vector3::from(xi) + b;
        [x[0], x[1], x[2]]
    })
}

/// Columns of the local stiffness matrix obtained by applying the cell kernel to unit vectors.
fn local_stiffness<const P: usize, const Q: usize>(
    tables: &TensorTables<f64, P, Q>,
    kappa: f64,
    coordinates: &CellCoordinates<f64>,
) -> DMatrix<f64> {
    let n = P * P * P;
    let mut matrix = DMatrix::zeros(n, n);
    for j in 0..n {
        let mut w = [[[0.0; P]; P]; P];
        w[j / (P * P)][(j / P) % P][j % P] = 1.0;
        let mut local = [[[0.0; P]; P]; P];
        tabulate_cell(tables, kappa, coordinates, &w, &mut local);
        matrix.set_column(j, &DVector::from_vec(flatten_cell_tensor(&local)));
    }
    matrix
}

fn well_conditioned_matrix3() -> impl Strategy<Value = Matrix3<f64>> {
    proptest::array::uniform9(-0.3..0.3).prop_map(|entries| Matrix3::from_row_slice(&entries) + Matrix3::identity() * 2.0)
}

#[test]
fn q1_unit_cube_stiffness_matches_closed_form() {
    let kappa = 2.5;
    let stiffness = local_stiffness(&Q1Tables::q1(), kappa, &unit_cube_coordinates());
    let expected = reference_unit_cube_stiffness(1) * kappa;
    assert_matrix_eq!(stiffness, expected, comp = abs, tol = 1e-13);

    // The classic table: 4/12 on the diagonal, 0 for edge neighbors, -1/12 otherwise
    for a in 0..8usize {
        for b in 0..8usize {
            let distance = (a ^ b).count_ones();
            let expected = match distance {
                0 => 4.0 / 12.0,
                1 => 0.0,
                _ => -1.0 / 12.0,
            };
            assert!((stiffness[(a, b)] / kappa - expected).abs() < 1e-13);
        }
    }
}

#[test]
fn q2_unit_cube_stiffness_matches_closed_form() {
    let stiffness = local_stiffness(&Q2Tables::q2(), 1.0, &unit_cube_coordinates());
    let expected = reference_unit_cube_stiffness(2);
    assert_matrix_eq!(stiffness, expected, comp = abs, tol = 1e-12);
}

#[test]
fn scaled_cube_stiffness_scales_with_edge_length() {
    // In 3D the Laplace stiffness matrix scales linearly with the edge length
    let h = 0.5;
    let coordinates = affine_coordinates(&(Matrix3::identity() * h), &Vector3::new(1.0, -2.0, 3.0));
    let stiffness = local_stiffness(&Q1Tables::q1(), 1.0, &coordinates);
    let expected = reference_unit_cube_stiffness(1) * h;
    assert_matrix_eq!(stiffness, expected, comp = abs, tol = 1e-13);
}

#[test]
fn reflected_cell_gives_same_stiffness() {
    let reflection = Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, 1.0));
    let coordinates = affine_coordinates(&reflection, &Vector3::zeros());
    let jacobian = evaluate_jacobian(&Q1Tables::q1(), &coordinates, [0, 1, 2]);
    assert!(jacobian_determinant(&jacobian) < 0.0);

    let stiffness = local_stiffness(&Q1Tables::q1(), 1.0, &coordinates);
    assert_matrix_eq!(stiffness, reference_unit_cube_stiffness(1), comp = abs, tol = 1e-13);
}

#[test]
fn local_stiffness_of_distorted_q2_cell_is_symmetric_and_annihilates_constants() {
    let mut coordinates = unit_cube_coordinates();
    coordinates[7] = [1.2, 0.9, 1.1];
    coordinates[2] = [-0.1, 1.05, 0.0];
    let stiffness = local_stiffness(&Q2Tables::q2(), 1.3, &coordinates);
    assert_matrix_eq!(stiffness, stiffness.transpose(), comp = abs, tol = 1e-12);
    for row in stiffness.row_iter() {
        assert!(row.sum().abs() < 1e-12);
    }
}

#[test]
fn cell_diagonal_matches_local_stiffness_diagonal() {
    let mut coordinates = unit_cube_coordinates();
    coordinates[7] = [1.2, 0.9, 1.1];
    coordinates[1] = [0.05, -0.1, 0.95];

    let stiffness = local_stiffness(&Q1Tables::q1(), 0.7, &coordinates);
    let mut local = [[[0.0; 2]; 2]; 2];
    tabulate_cell_diagonal(&Q1Tables::q1(), 0.7, &coordinates, &mut local);
    let diagonal = flatten_cell_tensor(&local);
    for (a, value) in diagonal.iter().enumerate() {
        assert!((value - stiffness[(a, a)]).abs() < 1e-13);
    }

    let stiffness = local_stiffness(&Q2Tables::q2(), 0.7, &coordinates);
    // Stale values are overwritten
    let mut local = [[[1.0; 3]; 3]; 3];
    tabulate_cell_diagonal(&Q2Tables::q2(), 0.7, &coordinates, &mut local);
    let diagonal = flatten_cell_tensor(&local);
    for (a, value) in diagonal.iter().enumerate() {
        assert!(*value > 0.0);
        assert!((value - stiffness[(a, a)]).abs() < 1e-12);
    }
}

#[test]
fn cell_vector_uses_dofmap_order() {
    let coordinates: Vec<f64> = unit_cube_coordinates().iter().flatten().copied().collect();
    let x_dofmap: Vec<usize> = (0..8).collect();
    // Reverse the field numbering
    let dofmap: Vec<usize> = (0..8).rev().collect();
    let mut w = vec![0.0; 8];
    w[7] = 1.0;
    let inputs = CellInputs {
        kappa: 1.0,
        x: &coordinates,
        x_dofmap: &x_dofmap,
        dofmap: &dofmap,
        w: &w,
    };
    let kernel = HexKernel::<f64>::new(HexDegree::Q1);
    assert_eq!(kernel.degree(), HexDegree::Q1);

    // Global dof 7 is local node 0, so the result is the first column of the local matrix
    let local = kernel.tabulate_cell_vector(&inputs, 0);
    let expected = reference_unit_cube_stiffness(1);
    for (a, value) in local.iter().enumerate() {
        assert!((value - expected[(a, 0)]).abs() < 1e-13);
    }
}

#[test]
fn identity_jacobian_flux_is_weighted_gradient() {
    let inverse = invert_jacobian(&Matrix3::identity());
    assert_eq!(inverse.det, 1.0);
    let flux = compute_weighted_flux(&inverse, &[1.0, -2.0, 3.0], 2.0, 0.25);
    assert_eq!(flux, [0.5, -1.0, 1.5]);
}

#[test]
fn reference_gradient_of_linear_field_is_constant() {
    let tables = Q2Tables::<f64>::q2();
    let nodes = [0.0, 1.0, 0.5];
    let mut w = [[[0.0; 3]; 3]; 3];
    for i0 in 0..3 {
        for i1 in 0..3 {
            for i2 in 0..3 {
                w[i0][i1][i2] = 1.0 + 2.0 * nodes[i0] - 3.0 * nodes[i1] + 0.5 * nodes[i2];
            }
        }
    }
    for q in Q2Tables::<f64>::quadrature_points() {
        let [g0, g1, g2] = evaluate_reference_gradient(&tables, &w, q);
        assert!((g0 - 2.0).abs() < 1e-13);
        assert!((g1 + 3.0).abs() < 1e-13);
        assert!((g2 - 0.5).abs() < 1e-13);
    }
}

proptest! {
    #[test]
    fn affine_jacobian_is_exact(a in well_conditioned_matrix3(), b in proptest::array::uniform3(-5.0..5.0)) {
        let coordinates = affine_coordinates(&a, &Vector3::from(b));
        for q in Q2Tables::<f64>::quadrature_points() {
            let jacobian = evaluate_jacobian(&Q2Tables::q2(), &coordinates, q);
            assert_matrix_eq!(jacobian, a, comp = abs, tol = 1e-13);
        }
    }

    #[test]
    fn cofactor_inverse_matches_nalgebra(a in well_conditioned_matrix3()) {
        let inverse = invert_jacobian(&a);
        let expected = a.try_inverse().unwrap();
        assert_matrix_eq!(inverse.inverse, expected, comp = abs, tol = 1e-13);
        prop_assert!((inverse.det - a.determinant()).abs() < 1e-12);
        // Both use the same expansion
        prop_assert_eq!(jacobian_determinant(&a), inverse.det);
    }
}
