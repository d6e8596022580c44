//! A Conjugate Gradient solver for linear operators given only by their action on vectors.
use crate::operator::MatFreeLaplace;
use crate::Real;
use core::fmt;
use eyre::eyre;
use log::debug;
use nalgebra::{
    ClosedAdd, ClosedMul, DMatrix, DVector, DVectorView, DVectorViewMut, RealField, Scalar, SymmetricEigen,
};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use num::{One, Zero};
use std::ops::{Deref, DerefMut};

/// A linear operator $y = A x$.
///
/// `y` is overwritten.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T> LinearOperator<T> for CsrMatrix<T>
where
    T: Scalar + Zero + One + ClosedMul + ClosedAdd,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        if self.nrows() != y.len() || self.ncols() != x.len() {
            return Err(eyre!(
                "Dimensions of {}x{} matrix do not match vectors (y: {}, x: {})",
                self.nrows(),
                self.ncols(),
                y.len(),
                x.len()
            ));
        }
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

impl<'a, T: Real> LinearOperator<T> for MatFreeLaplace<'a, T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        y.fill(T::zero());
        MatFreeLaplace::apply(self, x.as_slice(), y.as_mut_slice())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        y.copy_from(&x);
        Ok(())
    }
}

/// Applies homogeneous Dirichlet conditions to an operator by masking a set of dofs.
///
/// For masked dofs $y_i = x_i$. For all other dofs $y = A \tilde x$, where $\tilde x$ is $x$ with
/// the masked entries set to zero. The result is the operator with masked rows and columns
/// replaced by those of the identity, which is symmetric positive definite whenever the masked
/// dofs pin down the kernel of $A$.
#[derive(Debug, Clone)]
pub struct DirichletOperator<A> {
    operator: A,
    dofs: Vec<usize>,
}

impl<A> DirichletOperator<A> {
    pub fn new(operator: A, dofs: impl IntoIterator<Item = usize>) -> Self {
        let mut dofs: Vec<_> = dofs.into_iter().collect();
        dofs.sort_unstable();
        dofs.dedup();
        Self { operator, dofs }
    }

    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn inner(&self) -> &A {
        &self.operator
    }

    /// Sets the masked entries of `v` to `value`.
    pub fn fill_masked<T: Scalar>(&self, v: &mut [T], value: T) {
        for &dof in &self.dofs {
            v[dof] = value.clone();
        }
    }

    /// Zeroes the masked entries of `v`, e.g. to prepare a right-hand side.
    pub fn zero_masked<T: Scalar + Zero>(&self, v: &mut [T]) {
        self.fill_masked(v, T::zero());
    }
}

impl<T: Real, A: LinearOperator<T>> LinearOperator<T> for DirichletOperator<A> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> eyre::Result<()> {
        if let Some(&dof) = self.dofs.last() {
            if dof >= x.len() || dof >= y.len() {
                return Err(eyre!("Dirichlet dof {} out of bounds for vector of length {}", dof, x.len()));
            }
        }
        let mut masked_input = x.clone_owned();
        self.zero_masked(masked_input.as_mut_slice());
        apply_operator(&mut y, &self.operator, &masked_input)?;
        for &dof in &self.dofs {
            y[dof] = x[dof];
        }
        Ok(())
    }
}

/// y = Ax
pub(crate) fn apply_operator<'y, 'x, T, A>(
    y: impl Into<DVectorViewMut<'y, T>>,
    a: &A,
    x: impl Into<DVectorView<'x, T>>,
) -> eyre::Result<()>
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}

pub trait CgStoppingCriterion<T: Scalar> {
    /// Called by CG at the start of a new solve.
    fn reset(&self, _a: &dyn LinearOperator<T>, _x: DVectorView<T>, _b: DVectorView<T>) {}

    fn has_converged(
        &self,
        a: &dyn LinearOperator<T>,
        x: DVectorView<T>,
        b: DVectorView<T>,
        b_norm: T,
        iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind>;
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// The residual is the recursively updated residual of CG, not $b - Ax$.
#[derive(Debug)]
pub struct RelativeResidualCriterion<T: Scalar> {
    tol: T,
}

impl<T: Scalar + Zero> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl Default for RelativeResidualCriterion<f32> {
    fn default() -> Self {
        Self::new(1e-4)
    }
}

impl<T> CgStoppingCriterion<T> for RelativeResidualCriterion<T>
where
    T: RealField,
{
    fn has_converged(
        &self,
        _a: &dyn LinearOperator<T>,
        _x: DVectorView<T>,
        _b: DVectorView<T>,
        b_norm: T,
        _iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind> {
        let r_approx_norm = approx_residual.norm();
        let converged = r_approx_norm <= self.tol.clone() * b_norm;
        Ok(converged)
    }
}

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    Ap: DVector<T>,
}

#[allow(non_snake_case)]
struct Buffers<'a, T: Scalar> {
    r: &'a mut DVector<T>,
    z: &'a mut DVector<T>,
    p: &'a mut DVector<T>,
    Ap: &'a mut DVector<T>,
}

impl<T: Scalar + Zero> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            Ap: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> CgWorkspace<T> {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers<'_, T> {
        self.r.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
        self.p.resize_vertically_mut(dim, T::zero());
        self.Ap.resize_vertically_mut(dim, T::zero());
        Buffers {
            r: &mut self.r,
            z: &mut self.z,
            p: &mut self.p,
            Ap: &mut self.Ap,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

#[derive(Debug)]
pub struct ConjugateGradient<'a, T, A, P, Criterion>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, CgWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl<'a, T: Scalar + Zero> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(CgWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar + Zero> Default for ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T: Scalar> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut CgWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar, P, Criterion> ConjugateGradient<'a, T, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, T, A, P, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion> ConjugateGradient<'a, T, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, T, A, P2, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P> ConjugateGradient<'a, T, A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<'a, T, A, P, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(eyre::Report),
    PreconditionerError(eyre::Report),
    StoppingCriterionError(eyre::Report),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::StoppingCriterionError(err) => write!(f, "Error evaluating stopping criterion: {}", err),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: CgOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CG solve failed after {} iterations. Error: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector,
    pub num_iterations: usize,
    /// Step lengths $\alpha_k$, one per iteration.
    pub alphas: Vec<T>,
    /// Direction update coefficients $\beta_k$, one per iteration.
    pub betas: Vec<T>,
}

impl<T: RealField + Copy> CgOutput<T> {
    /// Estimates the extreme eigenvalues of the (preconditioned) operator from the Lanczos
    /// tridiagonal matrix implied by the CG coefficients.
    ///
    /// Returns `None` if no iterations were performed.
    pub fn estimate_extreme_eigenvalues(&self) -> Option<(T, T)> {
        let n = self.alphas.len().min(self.betas.len());
        if n == 0 {
            return None;
        }
        let (alphas, betas) = (&self.alphas[..n], &self.betas[..n]);

        let mut tridiagonal = DMatrix::zeros(n, n);
        for i in 0..n {
            tridiagonal[(i, i)] = T::one() / alphas[i];
        }
        for i in 1..n {
            tridiagonal[(i, i)] += betas[i - 1] / alphas[i - 1];
            let off_diagonal = betas[i - 1].sqrt() / alphas[i - 1];
            tridiagonal[(i, i - 1)] = off_diagonal;
            tridiagonal[(i - 1, i)] = off_diagonal;
        }

        let eigenvalues = SymmetricEigen::new(tridiagonal).eigenvalues;
        let min = eigenvalues.min();
        let max = eigenvalues.max();
        Some((min, max))
    }
}

impl<'a, T, A, P, Criterion> ConjugateGradient<'a, T, A, P, Criterion>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
{
    /// Solves $A x = b$ starting from the initial guess stored in `x`.
    ///
    /// # Panics
    ///
    /// Panics if `b` and `x` have different lengths.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    #[allow(non_snake_case)]
    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<CgOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = CgOutput {
            num_iterations: 0,
            alphas: Vec::new(),
            betas: Vec::new(),
        };

        let Buffers { r, z, p, Ap } = self.workspace.prepare_buffers(x.len());
        self.stopping_criterion.reset(&self.operator, (&x).into(), b);

        // r = b - Ax
        if let Err(err) = apply_operator(&mut *r, &self.operator, &x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.axpy(T::one(), &b, -T::one());

        // z = Pr
        if let Err(err) = apply_operator(&mut *z, &self.preconditioner, &*r) {
            return Err(SolveError::new(output, PreconditionerError(err)));
        }

        // p = z
        p.copy_from(&*z);

        let mut zTr = z.dot(&*r);
        let mut pAp;

        let b_norm = b.norm();

        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        loop {
            let convergence = self.stopping_criterion.has_converged(
                &self.operator,
                (&x).into(),
                b,
                b_norm,
                output.num_iterations,
                (&*r).into(),
            );

            let has_converged = match convergence {
                Ok(converged) => converged,
                Err(error_kind) => return Err(SolveError::new(output, error_kind)),
            };

            if has_converged {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            // Ap = A * p
            if let Err(err) = apply_operator(&mut *Ap, &self.operator, &*p) {
                return Err(SolveError::new(output, OperatorError(err)));
            }
            pAp = p.dot(&*Ap);

            if pAp <= T::zero() {
                return Err(SolveError::new(output, IndefiniteOperator));
            }
            if zTr <= T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            let alpha = zTr / pAp;
            // x <- x + alpha * p
            x.axpy(alpha, &*p, T::one());
            // r <- r - alpha * Ap
            r.axpy(-alpha, &*Ap, T::one());

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            if let Err(err) = apply_operator(&mut *z, &self.preconditioner, &*r) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            let zTr_next = z.dot(&*r);
            let beta = zTr_next / zTr;
            output.alphas.push(alpha);
            output.betas.push(beta);

            // p <- z + beta * p
            p.axpy(T::one(), &*z, beta);

            zTr = zTr_next;
        }

        debug!("CG converged after {} iterations", output.num_iterations);
        Ok(output)
    }
}
