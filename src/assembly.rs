//! Explicit assembly of the stiffness matrix of the weighted Laplace operator.
//!
//! The element matrices are computed from full 3D basis gradients rather than by sum
//! factorization, which makes the assembled matrix a useful reference for the matrix-free
//! kernels, and an explicit operator for coarse problems where a matrix is needed.
use crate::gather::gather_coordinates;
use crate::mesh::{validate_structure, HexMeshView};
use crate::tables::{HexDegree, Q1Tables, Q2Tables, TensorTables, GEOMETRY_NODES};
use crate::Real;
use eyre::eyre;
use log::debug;
use nalgebra::{DMatrix, Matrix3xX, OMatrix, U3, U8};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use std::convert::TryFrom;

#[allow(non_snake_case)]
fn assemble_element_stiffness<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    kappa: T,
    mesh: &HexMeshView<T>,
    cell: usize,
) -> eyre::Result<DMatrix<T>> {
    let n = P * P * P;
    let coordinates = gather_coordinates(mesh.x, mesh.x_dofmap, cell);
    let X = OMatrix::<T, U3, U8>::from_fn(|i, c| coordinates[c][i]);

    let (v, d) = (tables.phi(), tables.dphi());
    let (gv, gd) = (tables.geometry_phi(), tables.geometry_dphi());

    let mut K = DMatrix::zeros(n, n);
    let mut G_ref = Matrix3xX::zeros(n);
    for q in TensorTables::<T, P, Q>::quadrature_points() {
        let [q0, q1, q2] = q;
        // Reference gradients of the 8 geometry basis functions
        let G_geometry = OMatrix::<T, U3, U8>::from_fn(|dir, c| {
            let (c0, c1, c2) = (c / 4, (c / 2) % 2, c % 2);
            match dir {
                0 => gd[q0][c0] * gv[q1][c1] * gv[q2][c2],
                1 => gv[q0][c0] * gd[q1][c1] * gv[q2][c2],
                _ => gv[q0][c0] * gv[q1][c1] * gd[q2][c2],
            }
        });
        let J = &X * G_geometry.transpose();
        let J_det = J.determinant();
        let J_inv_t = J
            .try_inverse()
            .ok_or_else(|| eyre!("Singular element Jacobian encountered in cell {}", cell))?
            .transpose();

        for node in 0..n {
            let (i0, i1, i2) = (node / (P * P), (node / P) % P, node % P);
            G_ref[(0, node)] = d[q0][i0] * v[q1][i1] * v[q2][i2];
            G_ref[(1, node)] = v[q0][i0] * d[q1][i1] * v[q2][i2];
            G_ref[(2, node)] = v[q0][i0] * v[q1][i1] * d[q2][i2];
        }
        let G = J_inv_t * &G_ref;
        let scale = kappa * tables.weight(q) * J_det.abs();
        // K += scale * G^T G
        K.gemm_tr(scale, &G, &G, T::one());
    }
    Ok(K)
}

/// Computes the dense element stiffness matrix of a single cell, in dofmap order.
pub fn assemble_cell_stiffness<T: Real>(
    mesh: &HexMeshView<T>,
    degree: HexDegree,
    cell: usize,
) -> eyre::Result<DMatrix<T>> {
    let kappa = *mesh
        .constants
        .first()
        .ok_or_else(|| eyre!("No material constant supplied"))?;
    match degree {
        HexDegree::Q1 => assemble_element_stiffness(&Q1Tables::q1(), kappa, mesh, cell),
        HexDegree::Q2 => assemble_element_stiffness(&Q2Tables::q2(), kappa, mesh, cell),
    }
}

/// Assembles the global stiffness matrix in CSR format.
///
/// The matrix is square with dimension one past the largest field dof index.
pub fn assemble_stiffness_csr<T: Real>(mesh: &HexMeshView<T>, degree: usize) -> eyre::Result<CsrMatrix<T>> {
    let degree = HexDegree::try_from(degree)?;
    let num_dofs = validate_structure(mesh, degree)?;
    let n = degree.nodes_per_cell();

    let element_matrices = (0..mesh.num_cells)
        .into_par_iter()
        .map(|cell| assemble_cell_stiffness(mesh, degree, cell))
        .collect::<eyre::Result<Vec<_>>>()?;

    let mut coo = CooMatrix::new(num_dofs, num_dofs);
    for (cell, element_matrix) in element_matrices.iter().enumerate() {
        let cell_dofs = &mesh.dofmap[n * cell..n * (cell + 1)];
        for (a, &row) in cell_dofs.iter().enumerate() {
            for (b, &col) in cell_dofs.iter().enumerate() {
                coo.push(row, col, element_matrix[(a, b)]);
            }
        }
    }
    let csr = CsrMatrix::from(&coo);
    debug!(
        "Assembled {} stiffness matrix with {} rows and {} non-zeros from {} cells ({} corner nodes each)",
        degree,
        csr.nrows(),
        csr.nnz(),
        mesh.num_cells,
        GEOMETRY_NODES
    );
    Ok(csr)
}
