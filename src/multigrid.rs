//! Two-level p-multigrid for Dirichlet problems: a matrix-free Q2 fine level smoothed with
//! Jacobi-preconditioned Chebyshev iterations, and an assembled Q1 coarse level on the same
//! cells, solved directly.
use crate::cg::{
    apply_operator, ConjugateGradient, LinearOperator, RelativeResidualCriterion, SolveError, SolveErrorKind,
};
use crate::mesh::{validate_structure, HexMeshView};
use crate::operator::MatFreeLaplace;
use crate::tables::HexDegree;
use crate::Real;
use eyre::{bail, eyre};
use log::debug;
use nalgebra::{convert, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::{CooMatrix, CscMatrix, CsrMatrix};

/// Computes the diagonal of `laplace` with the rows and columns of `dirichlet_dofs` replaced by
/// those of the identity, matching [`DirichletOperator`](crate::cg::DirichletOperator).
pub fn dirichlet_diagonal<T: Real>(
    laplace: &MatFreeLaplace<T>,
    dirichlet_dofs: &[usize],
    num_dofs: usize,
) -> eyre::Result<DVector<T>> {
    let mut diagonal = DVector::zeros(num_dofs);
    laplace.diagonal(diagonal.as_mut_slice())?;
    for &dof in dirichlet_dofs {
        if dof >= num_dofs {
            bail!("Dirichlet dof {} out of bounds for {} dofs", dof, num_dofs);
        }
        diagonal[dof] = T::one();
    }
    Ok(diagonal)
}

/// The preconditioner $y = D^{-1} x$ for a positive diagonal $D$.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Real> {
    inverse_diagonal: DVector<T>,
}

impl<T: Real> JacobiPreconditioner<T> {
    pub fn from_diagonal(diagonal: &DVector<T>) -> eyre::Result<Self> {
        if let Some(index) = diagonal.iter().position(|&d| !(d > T::zero())) {
            bail!("Diagonal entry {} is not positive: {}", index, diagonal[index]);
        }
        Ok(Self {
            inverse_diagonal: diagonal.map(|d| T::one() / d),
        })
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }
}

impl<T: Real> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        if x.len() != self.inverse_diagonal.len() || y.len() != x.len() {
            bail!(
                "Jacobi preconditioner of dimension {} applied to vectors (y: {}, x: {})",
                self.inverse_diagonal.len(),
                y.len(),
                x.len()
            );
        }
        y.copy_from(&x);
        y.component_mul_assign(&self.inverse_diagonal);
        Ok(())
    }
}

/// Estimates the largest eigenvalue of the preconditioned operator $P A$ from the Lanczos
/// coefficients of at most `max_iter` CG iterations with a right-hand side of ones.
pub fn estimate_largest_eigenvalue<T, A, P>(
    operator: A,
    preconditioner: P,
    num_dofs: usize,
    max_iter: usize,
) -> eyre::Result<T>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    let b = DVector::repeat(num_dofs, T::one());
    let mut x = DVector::zeros(num_dofs);
    let result = ConjugateGradient::new()
        .with_operator(operator)
        .with_preconditioner(preconditioner)
        .with_stopping_criterion(RelativeResidualCriterion::new(convert::<f64, T>(1e-6)))
        .with_max_iter(max_iter)
        .solve_with_guess(&b, &mut x);
    let output = match result {
        Ok(output) => output,
        Err(SolveError {
            output,
            kind: SolveErrorKind::MaxIterationsReached { .. },
        }) => output,
        Err(err) => return Err(eyre!("Eigenvalue estimation failed: {}", err)),
    };
    let (_, lambda_max) = output
        .estimate_extreme_eigenvalues()
        .ok_or_else(|| eyre!("CG performed no iterations, no eigenvalue estimate available"))?;
    debug!(
        "Estimated largest eigenvalue {} after {} CG iterations",
        lambda_max, output.num_iterations
    );
    Ok(lambda_max)
}

/// Chebyshev polynomial smoother for $A x = b$, preconditioned with $P$.
///
/// The iteration damps the error components whose eigenvalues of $P A$ lie in
/// `[lambda_min, lambda_max]` and never amplifies those below.
#[derive(Debug, Clone)]
pub struct ChebyshevSmoother<T, A, P> {
    operator: A,
    preconditioner: P,
    lambda_min: T,
    lambda_max: T,
    num_iterations: usize,
}

impl<T: Real, A, P> ChebyshevSmoother<T, A, P> {
    pub fn new(
        operator: A,
        preconditioner: P,
        (lambda_min, lambda_max): (T, T),
        num_iterations: usize,
    ) -> eyre::Result<Self> {
        if !(T::zero() <= lambda_min && lambda_min < lambda_max) {
            bail!("Invalid Chebyshev bounds [{}, {}]", lambda_min, lambda_max);
        }
        Ok(Self {
            operator,
            preconditioner,
            lambda_min,
            lambda_max,
            num_iterations,
        })
    }

    /// Targets the upper part `[0.1, 1.1] * lambda_max` of the spectrum, where `lambda_max` is an
    /// estimate of the largest eigenvalue of $P A$.
    pub fn from_largest_eigenvalue(
        operator: A,
        preconditioner: P,
        lambda_max: T,
        num_iterations: usize,
    ) -> eyre::Result<Self> {
        let bounds = (lambda_max * convert::<f64, T>(0.1), lambda_max * convert::<f64, T>(1.1));
        Self::new(operator, preconditioner, bounds, num_iterations)
    }

    pub fn bounds(&self) -> (T, T) {
        (self.lambda_min, self.lambda_max)
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn operator(&self) -> &A {
        &self.operator
    }

    pub fn preconditioner(&self) -> &P {
        &self.preconditioner
    }
}

impl<T, A, P> ChebyshevSmoother<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    /// Improves the approximate solution `x` of $A x = b$ in place.
    pub fn smooth(&self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> eyre::Result<()> {
        let n = b.len();
        if x.len() != n {
            bail!("Right-hand side has length {} but solution has length {}", n, x.len());
        }
        if self.num_iterations == 0 {
            return Ok(());
        }

        let two = T::one() + T::one();
        let theta = (self.lambda_max + self.lambda_min) / two;
        let delta = (self.lambda_max - self.lambda_min) / two;
        let sigma = theta / delta;
        let mut rho = T::one() / sigma;

        // r = b - Ax
        let mut r = DVector::zeros(n);
        apply_operator(&mut r, &self.operator, &x)?;
        r.axpy(T::one(), &b, -T::one());

        let mut z = DVector::zeros(n);
        apply_operator(&mut z, &self.preconditioner, &r)?;
        let mut d = z.unscale(theta);
        let mut ad = DVector::zeros(n);

        for iteration in 0..self.num_iterations {
            x.axpy(T::one(), &d, T::one());
            if iteration + 1 == self.num_iterations {
                break;
            }

            // r <- r - A d, z <- P r
            apply_operator(&mut ad, &self.operator, &d)?;
            r.axpy(-T::one(), &ad, T::one());
            apply_operator(&mut z, &self.preconditioner, &r)?;

            let rho_next = T::one() / (two * sigma - rho);
            d *= rho_next * rho;
            d.axpy(two * rho_next / delta, &z, T::one());
            rho = rho_next;
        }
        Ok(())
    }
}

/// Assembles the interpolation of Q1 fields into the Q2 space on the same cells.
///
/// The result has one row per Q2 dof and one column per Q1 dof. Since both spaces share the
/// trilinear geometry map, the entries are the Q1 basis functions evaluated at the Q2 reference
/// nodes and do not depend on the coordinates. Its transpose restricts Q2 residuals to Q1.
pub fn assemble_q1_to_q2_prolongation<T: Real>(
    coarse: &HexMeshView<T>,
    fine: &HexMeshView<T>,
) -> eyre::Result<CsrMatrix<T>> {
    if coarse.num_cells != fine.num_cells {
        bail!(
            "Coarse mesh has {} cells but fine mesh has {}",
            coarse.num_cells,
            fine.num_cells
        );
    }
    let num_coarse_dofs = validate_structure(coarse, HexDegree::Q1)?;
    let num_fine_dofs = validate_structure(fine, HexDegree::Q2)?;

    // Q1 basis [1 - xi, xi] at the Q2 nodes [0, 1, 1/2]
    let half = convert::<f64, T>(0.5);
    let weights = [[T::one(), T::zero()], [T::zero(), T::one()], [half, half]];

    let coarse_nodes = HexDegree::Q1.nodes_per_cell();
    let fine_nodes = HexDegree::Q2.nodes_per_cell();
    let mut visited = vec![false; num_fine_dofs];
    let mut coo = CooMatrix::new(num_fine_dofs, num_coarse_dofs);
    for cell in 0..fine.num_cells {
        let coarse_dofs = &coarse.dofmap[coarse_nodes * cell..coarse_nodes * (cell + 1)];
        let fine_dofs = &fine.dofmap[fine_nodes * cell..fine_nodes * (cell + 1)];
        for (i, &fine_dof) in fine_dofs.iter().enumerate() {
            // Shared nodes interpolate to the same values from every cell
            if visited[fine_dof] {
                continue;
            }
            visited[fine_dof] = true;
            let [i0, i1, i2] = [i / 9, (i / 3) % 3, i % 3];
            for (c, &coarse_dof) in coarse_dofs.iter().enumerate() {
                let [c0, c1, c2] = [c / 4, (c / 2) % 2, c % 2];
                let weight = weights[i0][c0] * weights[i1][c1] * weights[i2][c2];
                if weight != T::zero() {
                    coo.push(fine_dof, coarse_dof, weight);
                }
            }
        }
    }
    Ok(CsrMatrix::from(&coo))
}

/// Replaces the rows and columns of `dofs` by those of the identity.
///
/// The diagonal entries of `dofs` must be present in the sparsity pattern.
pub fn apply_dirichlet_to_csr<T: Real>(matrix: &mut CsrMatrix<T>, dofs: &[usize]) -> eyre::Result<()> {
    let n = matrix.nrows();
    if matrix.ncols() != n {
        bail!("Matrix must be square, got {}x{}", n, matrix.ncols());
    }
    let mut masked = vec![false; n];
    for &dof in dofs {
        if dof >= n {
            bail!("Dirichlet dof {} out of bounds for {}x{} matrix", dof, n, n);
        }
        masked[dof] = true;
    }
    for (i, mut row) in matrix.row_iter_mut().enumerate() {
        let (cols, values) = row.cols_and_values_mut();
        for (&j, value) in cols.iter().zip(values) {
            if masked[i] || masked[j] {
                *value = if i == j { T::one() } else { T::zero() };
            }
        }
    }
    Ok(())
}

/// A two-level V-cycle: pre-smoothing, restriction of the residual, an exact coarse solve,
/// prolongation of the coarse correction and post-smoothing.
///
/// Applied from a zero initial guess, the cycle is a symmetric positive definite preconditioner
/// for CG.
pub struct TwoLevelMultigrid<T: Real, A, P> {
    smoother: ChebyshevSmoother<T, A, P>,
    prolongation: CsrMatrix<T>,
    coarse_solver: CscCholesky<T>,
    coarse_dirichlet_dofs: Vec<usize>,
}

impl<T: Real, A, P> std::fmt::Debug for TwoLevelMultigrid<T, A, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoLevelMultigrid")
            .field("fine_dofs", &self.prolongation.nrows())
            .field("coarse_dofs", &self.prolongation.ncols())
            .field("smoother_bounds", &self.smoother.bounds())
            .field("smoother_iterations", &self.smoother.num_iterations())
            .finish()
    }
}

impl<T: Real, A, P> TwoLevelMultigrid<T, A, P> {
    /// Builds the cycle from a fine-level smoother, the prolongation from coarse to fine dofs and
    /// the assembled coarse operator without boundary conditions.
    ///
    /// The rows and columns of `coarse_dirichlet_dofs` in the coarse matrix are replaced by
    /// those of the identity before it is factored.
    pub fn new(
        smoother: ChebyshevSmoother<T, A, P>,
        prolongation: CsrMatrix<T>,
        mut coarse_matrix: CsrMatrix<T>,
        coarse_dirichlet_dofs: impl IntoIterator<Item = usize>,
    ) -> eyre::Result<Self> {
        if coarse_matrix.nrows() != prolongation.ncols() {
            bail!(
                "Coarse matrix has {} rows but prolongation has {} columns",
                coarse_matrix.nrows(),
                prolongation.ncols()
            );
        }
        let mut coarse_dirichlet_dofs: Vec<_> = coarse_dirichlet_dofs.into_iter().collect();
        coarse_dirichlet_dofs.sort_unstable();
        coarse_dirichlet_dofs.dedup();
        apply_dirichlet_to_csr(&mut coarse_matrix, &coarse_dirichlet_dofs)?;

        let coarse_solver = CscCholesky::factor(&CscMatrix::from(&coarse_matrix))
            .map_err(|err| eyre!("Factorization of the coarse operator failed: {:?}", err))?;
        debug!(
            "Two-level multigrid with {} fine and {} coarse dofs",
            prolongation.nrows(),
            prolongation.ncols()
        );
        Ok(Self {
            smoother,
            prolongation,
            coarse_solver,
            coarse_dirichlet_dofs,
        })
    }

    pub fn smoother(&self) -> &ChebyshevSmoother<T, A, P> {
        &self.smoother
    }

    pub fn prolongation(&self) -> &CsrMatrix<T> {
        &self.prolongation
    }
}

impl<T, A, P> TwoLevelMultigrid<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    /// Performs one V-cycle for $A x = b$, updating `x` in place.
    pub fn v_cycle(&self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> eyre::Result<()> {
        let n = self.prolongation.nrows();
        if b.len() != n || x.len() != n {
            bail!(
                "V-cycle on {} fine dofs applied to vectors (b: {}, x: {})",
                n,
                b.len(),
                x.len()
            );
        }

        self.smoother.smooth(b, (&mut x).into())?;

        // r = b - Ax
        let mut r = DVector::zeros(n);
        apply_operator(&mut r, self.smoother.operator(), &x)?;
        r.axpy(T::one(), &b, -T::one());

        let mut coarse_correction = DVector::zeros(self.prolongation.ncols());
        spmm_csr_dense(
            T::zero(),
            &mut coarse_correction,
            T::one(),
            Op::Transpose(&self.prolongation),
            Op::NoOp(&r),
        );
        for &dof in &self.coarse_dirichlet_dofs {
            coarse_correction[dof] = T::zero();
        }
        self.coarse_solver.solve_mut(&mut coarse_correction);

        // x <- x + P e
        spmm_csr_dense(
            T::one(),
            &mut x,
            T::one(),
            Op::NoOp(&self.prolongation),
            Op::NoOp(&coarse_correction),
        );

        self.smoother.smooth(b, x)
    }
}

impl<T, A, P> LinearOperator<T> for TwoLevelMultigrid<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        y.fill(T::zero());
        self.v_cycle(x, y)
    }
}
