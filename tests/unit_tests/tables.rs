use fenris_matfree::error::ConfigurationError;
use fenris_matfree::tables::{HexDegree, Q1Tables, Q2Tables, TensorTables, GAUSS_POINTS_3, GAUSS_POINTS_4};
use std::convert::TryFrom;

fn lagrange(nodes: &[f64], i: usize, x: f64) -> f64 {
    nodes
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, &x_j)| (x - x_j) / (nodes[i] - x_j))
        .product()
}

fn lagrange_derivative(nodes: &[f64], i: usize, x: f64) -> f64 {
    (0..nodes.len())
        .filter(|&k| k != i)
        .map(|k| {
            let others: f64 = nodes
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i && *j != k)
                .map(|(_, &x_j)| (x - x_j) / (nodes[i] - x_j))
                .product();
            others / (nodes[i] - nodes[k])
        })
        .sum()
}

fn gauss_weights_3() -> [f64; 3] {
    [5.0 / 18.0, 8.0 / 18.0, 5.0 / 18.0]
}

fn gauss_weights_4() -> [f64; 4] {
    let sqrt30 = 30.0f64.sqrt();
    let outer = (18.0 - sqrt30) / 72.0;
    let inner = (18.0 + sqrt30) / 72.0;
    [outer, inner, inner, outer]
}

fn assert_tables_match<const P: usize, const Q: usize>(
    tables: &TensorTables<f64, P, Q>,
    nodes: &[f64; P],
    points: &[f64; Q],
    weights_1d: &[f64; Q],
) {
    let tol = 1e-13;
    for q in 0..Q {
        for i in 0..P {
            assert!((tables.phi()[q][i] - lagrange(nodes, i, points[q])).abs() < tol);
            assert!((tables.dphi()[q][i] - lagrange_derivative(nodes, i, points[q])).abs() < tol);
        }
        for c in 0..2 {
            let x = points[q];
            let linear = if c == 0 { 1.0 - x } else { x };
            let dlinear = if c == 0 { -1.0 } else { 1.0 };
            assert!((tables.geometry_phi()[q][c] - linear).abs() < tol);
            assert!((tables.geometry_dphi()[q][c] - dlinear).abs() < tol);
        }
    }

    for [q0, q1, q2] in TensorTables::<f64, P, Q>::quadrature_points() {
        let expected = weights_1d[q0] * weights_1d[q1] * weights_1d[q2];
        assert!((tables.weight([q0, q1, q2]) - expected).abs() < tol);
    }
}

#[test]
fn q1_tables_are_lagrange_basis_at_gauss_points() {
    assert_tables_match(&Q1Tables::<f64>::q1(), &[0.0, 1.0], &GAUSS_POINTS_3, &gauss_weights_3());
}

#[test]
fn q2_tables_are_lagrange_basis_at_gauss_points() {
    assert_tables_match(
        &Q2Tables::<f64>::q2(),
        &[0.0, 1.0, 0.5],
        &GAUSS_POINTS_4,
        &gauss_weights_4(),
    );
}

#[test]
fn gauss_points_are_roots_of_legendre_polynomials() {
    // Shifted to [0, 1]: P_3(2x - 1) and P_4(2x - 1)
    let p3 = |x: f64| {
        let t = 2.0 * x - 1.0;
        0.5 * (5.0 * t.powi(3) - 3.0 * t)
    };
    let p4 = |x: f64| {
        let t = 2.0 * x - 1.0;
        0.125 * (35.0 * t.powi(4) - 30.0 * t.powi(2) + 3.0)
    };
    assert!(GAUSS_POINTS_3.iter().all(|&x| p3(x).abs() < 1e-14));
    assert!(GAUSS_POINTS_4.iter().all(|&x| p4(x).abs() < 1e-14));
}

#[test]
fn weights_sum_to_unit_volume() {
    let q1: f64 = Q1Tables::<f64>::q1().weights().iter().flatten().flatten().sum();
    let q2: f64 = Q2Tables::<f64>::q2().weights().iter().flatten().flatten().sum();
    assert!((q1 - 1.0).abs() < 1e-14);
    assert!((q2 - 1.0).abs() < 1e-14);
}

#[test]
fn basis_is_partition_of_unity() {
    let q2 = Q2Tables::<f64>::q2();
    for (phi, dphi) in q2.phi().iter().zip(q2.dphi()) {
        assert!((phi.iter().sum::<f64>() - 1.0).abs() < 1e-14);
        assert!(dphi.iter().sum::<f64>().abs() < 1e-13);
    }
}

#[test]
fn single_precision_tables_match_double_precision() {
    let single = Q2Tables::<f32>::q2();
    let double = Q2Tables::<f64>::q2();
    for (row_f32, row_f64) in single.dphi().iter().zip(double.dphi()) {
        for (&a, &b) in row_f32.iter().zip(row_f64) {
            assert!((a as f64 - b).abs() < 1e-6);
        }
    }
}

#[test]
fn quadrature_points_are_row_major() {
    let points: Vec<_> = Q1Tables::<f64>::quadrature_points().collect();
    assert_eq!(points.len(), 27);
    assert_eq!(points[0], [0, 0, 0]);
    assert_eq!(points[1], [0, 0, 1]);
    assert_eq!(points[3], [0, 1, 0]);
    assert_eq!(points[9], [1, 0, 0]);
    assert_eq!(points[26], [2, 2, 2]);
}

#[test]
fn hex_degree_from_integer() {
    assert_eq!(HexDegree::try_from(1), Ok(HexDegree::Q1));
    assert_eq!(HexDegree::try_from(2), Ok(HexDegree::Q2));
    assert_eq!(
        HexDegree::try_from(0),
        Err(ConfigurationError::UnsupportedDegree { degree: 0 })
    );
    assert_eq!(
        HexDegree::try_from(3),
        Err(ConfigurationError::UnsupportedDegree { degree: 3 })
    );
}

#[test]
fn hex_degree_sizes() {
    assert_eq!(HexDegree::Q1.nodes_per_cell(), 8);
    assert_eq!(HexDegree::Q2.nodes_per_cell(), 27);
    assert_eq!(HexDegree::Q1.quadrature_points_per_dim(), 3);
    assert_eq!(HexDegree::Q2.quadrature_points_per_dim(), 4);
    assert_eq!(HexDegree::Q2.to_string(), "Q2");
}
