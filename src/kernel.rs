//! Sum-factorized per-cell kernels for the weighted Laplace operator.
//!
//! For a single cell with corner coordinates $x$ and nodal field values $w$, the kernel computes
//! the local vector
//!
//! $$ A_i = \sum_q \omega_q \kappa |\det J_q| (J_q^{-1} J_q^{-T} \hat\nabla w_q) \cdot \hat\nabla \phi_i $$
//!
//! where all reference gradients are evaluated as tensor products of 1D tables.
//!
//! Evaluation order is fixed: cofactors first, then the determinant from the first row of
//! cofactors, then gradient and flux sums left to right.
use crate::gather::{gather_coefficients, gather_coordinates, CellCoordinates, CellTensor};
use crate::scatter::{scatter_add, AtomicSlice};
use crate::tables::{HexDegree, Q1Tables, Q2Tables, TensorTables};
use crate::Real;
use nalgebra::{Matrix3, Vector3};

/// Evaluates the Jacobian $J_{ij} = \partial x_i / \partial \xi_j$ of the trilinear geometry map
/// at the quadrature point `q`.
#[inline]
pub fn evaluate_jacobian<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    coordinates: &CellCoordinates<T>,
    [q0, q1, q2]: [usize; 3],
) -> Matrix3<T> {
    let v = tables.geometry_phi();
    let d = tables.geometry_dphi();
    let mut jacobian = Matrix3::zeros();
    for ic0 in 0..2 {
        for ic1 in 0..2 {
            for ic2 in 0..2 {
                let node = &coordinates[4 * ic0 + 2 * ic1 + ic2];
                let d0 = d[q0][ic0] * v[q1][ic1] * v[q2][ic2];
                let d1 = v[q0][ic0] * d[q1][ic1] * v[q2][ic2];
                let d2 = v[q0][ic0] * v[q1][ic1] * d[q2][ic2];
                for i in 0..3 {
                    jacobian[(i, 0)] += node[i] * d0;
                    jacobian[(i, 1)] += node[i] * d1;
                    jacobian[(i, 2)] += node[i] * d2;
                }
            }
        }
    }
    jacobian
}

/// Evaluates the gradient of the interpolated field with respect to the reference coordinates,
/// i.e. $(\partial_{\xi_0} w, \partial_{\xi_1} w, \partial_{\xi_2} w)$ at the quadrature point `q`.
#[inline]
pub fn evaluate_reference_gradient<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    w: &CellTensor<T, P>,
    [q0, q1, q2]: [usize; 3],
) -> [T; 3] {
    let v = tables.phi();
    let d = tables.dphi();
    let mut w_d100 = T::zero();
    let mut w_d010 = T::zero();
    let mut w_d001 = T::zero();
    for ic0 in 0..P {
        for ic1 in 0..P {
            for ic2 in 0..P {
                let w_node = w[ic0][ic1][ic2];
                w_d100 += w_node * (d[q0][ic0] * v[q1][ic1] * v[q2][ic2]);
                w_d010 += w_node * (v[q0][ic0] * d[q1][ic1] * v[q2][ic2]);
                w_d001 += w_node * (v[q0][ic0] * v[q1][ic1] * d[q2][ic2]);
            }
        }
    }
    [w_d100, w_d010, w_d001]
}

/// The determinant and inverse of a Jacobian, computed by cofactor expansion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseJacobian<T: Real> {
    pub det: T,
    pub inverse: Matrix3<T>,
}

/// Computes the determinant by expansion along the first row and the inverse as the ratios of
/// cofactors and the determinant.
///
/// No check is made for singular matrices: a zero determinant produces non-finite entries.
#[inline]
#[allow(non_snake_case)]
pub fn invert_jacobian<T: Real>(J: &Matrix3<T>) -> InverseJacobian<T> {
    let (j0, j1, j2) = (J[(0, 0)], J[(0, 1)], J[(0, 2)]);
    let (j3, j4, j5) = (J[(1, 0)], J[(1, 1)], J[(1, 2)]);
    let (j6, j7, j8) = (J[(2, 0)], J[(2, 1)], J[(2, 2)]);

    let cof_00 = j4 * j8 - j5 * j7;
    let minor_01 = j3 * j8 - j5 * j6;
    let cof_02 = j3 * j7 - j4 * j6;
    let det = j0 * cof_00 - minor_01 * j1 + j2 * cof_02;

    let k00 = cof_00 / det;
    let k10 = (j5 * j6 - j3 * j8) / det;
    let k20 = cof_02 / det;
    let k01 = (j2 * j7 - j1 * j8) / det;
    let k11 = (j0 * j8 - j2 * j6) / det;
    let k21 = (j1 * j6 - j0 * j7) / det;
    let k02 = (j1 * j5 - j2 * j4) / det;
    let k12 = (j2 * j3 - j0 * j5) / det;
    let k22 = (j0 * j4 - j1 * j3) / det;

    #[rustfmt::skip]
    let inverse = Matrix3::new(
        k00, k01, k02,
        k10, k11, k12,
        k20, k21, k22,
    );
    InverseJacobian { det, inverse }
}

/// Jacobian determinant by the same expansion as [`invert_jacobian`].
#[inline]
#[allow(non_snake_case)]
pub fn jacobian_determinant<T: Real>(J: &Matrix3<T>) -> T {
    let cof_00 = J[(1, 1)] * J[(2, 2)] - J[(1, 2)] * J[(2, 1)];
    let minor_01 = J[(1, 0)] * J[(2, 2)] - J[(1, 2)] * J[(2, 0)];
    let cof_02 = J[(1, 0)] * J[(2, 1)] - J[(1, 1)] * J[(2, 0)];
    J[(0, 0)] * cof_00 - minor_01 * J[(0, 1)] + J[(0, 2)] * cof_02
}

/// Computes the three weighted flux scalars of one quadrature point.
///
/// With $K = J^{-1}$ and $g = K^T \hat\nabla w$ the physical gradient, the flux is
/// $f_j = \kappa |\det J| \omega \sum_i K_{ji} g_i$, i.e. the physical flux pulled back to the
/// reference cell, ready to be contracted with reference basis gradients.
#[inline]
pub fn compute_weighted_flux<T: Real>(
    inverse_jacobian: &InverseJacobian<T>,
    reference_gradient: &[T; 3],
    kappa: T,
    weight: T,
) -> [T; 3] {
    let k = &inverse_jacobian.inverse;
    let [w_d100, w_d010, w_d001] = *reference_gradient;

    // Physical gradient
    let grad_x = w_d100 * k[(0, 0)] + w_d010 * k[(1, 0)] + w_d001 * k[(2, 0)];
    let grad_y = w_d100 * k[(0, 1)] + w_d010 * k[(1, 1)] + w_d001 * k[(2, 1)];
    let grad_z = w_d100 * k[(0, 2)] + w_d010 * k[(1, 2)] + w_d001 * k[(2, 2)];

    let flux_0 = grad_y * k[(0, 1)] + grad_x * k[(0, 0)] + grad_z * k[(0, 2)];
    let flux_1 = grad_y * k[(1, 1)] + grad_x * k[(1, 0)] + grad_z * k[(1, 2)];
    let flux_2 = grad_x * k[(2, 0)] + grad_y * k[(2, 1)] + grad_z * k[(2, 2)];

    let volume_scale = inverse_jacobian.det.abs();
    [
        kappa * flux_0 * volume_scale * weight,
        kappa * flux_1 * volume_scale * weight,
        kappa * flux_2 * volume_scale * weight,
    ]
}

/// Adds the contraction of the weighted flux with the reference basis gradients of every test
/// function to the local tensor.
#[inline]
pub fn accumulate_flux<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    [fw0, fw1, fw2]: [T; 3],
    [q0, q1, q2]: [usize; 3],
    local: &mut CellTensor<T, P>,
) {
    let v = tables.phi();
    let d = tables.dphi();
    for i0 in 0..P {
        for i1 in 0..P {
            for i2 in 0..P {
                let a = &mut local[i0][i1][i2];
                *a += fw0 * (d[q0][i0] * v[q1][i1] * v[q2][i2]);
                *a += fw1 * (v[q0][i0] * d[q1][i1] * v[q2][i2]);
                *a += fw2 * (v[q0][i0] * v[q1][i1] * d[q2][i2]);
            }
        }
    }
}

/// Computes the local operator action of a single cell.
///
/// `local` is overwritten.
pub fn tabulate_cell<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    kappa: T,
    coordinates: &CellCoordinates<T>,
    w: &CellTensor<T, P>,
    local: &mut CellTensor<T, P>,
) {
    *local = [[[T::zero(); P]; P]; P];
    for q0 in 0..Q {
        for q1 in 0..Q {
            for q2 in 0..Q {
                let q = [q0, q1, q2];
                let jacobian = evaluate_jacobian(tables, coordinates, q);
                let reference_gradient = evaluate_reference_gradient(tables, w, q);
                let inverse_jacobian = invert_jacobian(&jacobian);
                let flux = compute_weighted_flux(&inverse_jacobian, &reference_gradient, kappa, tables.weight(q));
                accumulate_flux(tables, flux, q, local);
            }
        }
    }
}

/// Computes the diagonal of the local stiffness matrix of a single cell.
///
/// Entry $i$ is $\sum_q \omega_q \kappa |\det J_q| \hat\nabla \phi_i^T J_q^{-1} J_q^{-T} \hat\nabla \phi_i$.
/// `local` is overwritten.
pub fn tabulate_cell_diagonal<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    kappa: T,
    coordinates: &CellCoordinates<T>,
    local: &mut CellTensor<T, P>,
) {
    *local = [[[T::zero(); P]; P]; P];
    let v = tables.phi();
    let d = tables.dphi();
    for q in TensorTables::<T, P, Q>::quadrature_points() {
        let [q0, q1, q2] = q;
        let jacobian = evaluate_jacobian(tables, coordinates, q);
        let inverse_jacobian = invert_jacobian(&jacobian);
        let k = &inverse_jacobian.inverse;
        let scale = kappa * inverse_jacobian.det.abs() * tables.weight(q);
        let metric = k * k.transpose() * scale;
        for i0 in 0..P {
            for i1 in 0..P {
                for i2 in 0..P {
                    let grad = Vector3::new(
                        d[q0][i0] * v[q1][i1] * v[q2][i2],
                        v[q0][i0] * d[q1][i1] * v[q2][i2],
                        v[q0][i0] * v[q1][i1] * d[q2][i2],
                    );
                    local[i0][i1][i2] += grad.dot(&(metric * grad));
                }
            }
        }
    }
}

/// Global data read by the cell kernels during one operator application.
#[derive(Debug, Clone, Copy)]
pub struct CellInputs<'a, T> {
    pub kappa: T,
    pub x: &'a [T],
    pub x_dofmap: &'a [usize],
    pub dofmap: &'a [usize],
    pub w: &'a [T],
}

/// Gathers, evaluates and scatters a single cell.
#[inline]
pub fn apply_cell<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    inputs: &CellInputs<T>,
    output: &AtomicSlice<T>,
    cell: usize,
) {
    let coordinates = gather_coordinates(inputs.x, inputs.x_dofmap, cell);
    let mut w_local = [[[T::zero(); P]; P]; P];
    gather_coefficients(inputs.w, inputs.dofmap, cell, &mut w_local);
    let mut local = [[[T::zero(); P]; P]; P];
    tabulate_cell(tables, inputs.kappa, &coordinates, &w_local, &mut local);
    scatter_add(output, inputs.dofmap, cell, &local);
}

/// Scatters the local stiffness diagonal of a single cell. The field values `inputs.w` are not
/// read.
#[inline]
pub fn apply_cell_diagonal<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    inputs: &CellInputs<T>,
    output: &AtomicSlice<T>,
    cell: usize,
) {
    let coordinates = gather_coordinates(inputs.x, inputs.x_dofmap, cell);
    let mut local = [[[T::zero(); P]; P]; P];
    tabulate_cell_diagonal(tables, inputs.kappa, &coordinates, &mut local);
    scatter_add(output, inputs.dofmap, cell, &local);
}

/// A cell kernel together with its tables, selected once by polynomial degree.
#[derive(Debug, Clone, PartialEq)]
pub enum HexKernel<T> {
    Q1(Q1Tables<T>),
    Q2(Q2Tables<T>),
}

impl<T: Real> HexKernel<T> {
    pub fn new(degree: HexDegree) -> Self {
        match degree {
            HexDegree::Q1 => Self::Q1(Q1Tables::q1()),
            HexDegree::Q2 => Self::Q2(Q2Tables::q2()),
        }
    }

    pub fn degree(&self) -> HexDegree {
        match self {
            Self::Q1(_) => HexDegree::Q1,
            Self::Q2(_) => HexDegree::Q2,
        }
    }

    /// Computes the local operator action of `cell` in dofmap order, without scattering.
    pub fn tabulate_cell_vector(&self, inputs: &CellInputs<T>, cell: usize) -> Vec<T> {
        fn tabulate<T: Real, const P: usize, const Q: usize>(
            tables: &TensorTables<T, P, Q>,
            inputs: &CellInputs<T>,
            cell: usize,
        ) -> Vec<T> {
            let coordinates = gather_coordinates(inputs.x, inputs.x_dofmap, cell);
            let mut w_local = [[[T::zero(); P]; P]; P];
            gather_coefficients(inputs.w, inputs.dofmap, cell, &mut w_local);
            let mut local = [[[T::zero(); P]; P]; P];
            tabulate_cell(tables, inputs.kappa, &coordinates, &w_local, &mut local);
            crate::gather::flatten_cell_tensor(&local)
        }

        match self {
            Self::Q1(tables) => tabulate(tables, inputs, cell),
            Self::Q2(tables) => tabulate(tables, inputs, cell),
        }
    }
}
