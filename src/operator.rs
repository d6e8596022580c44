//! The matrix-free Laplace operator.
use crate::error::{ConfigurationError, LaunchError, MeshError, OperatorError};
use crate::kernel::{apply_cell, apply_cell_diagonal, CellInputs, HexKernel};
use crate::mesh::{validate_mesh, validate_structure, HexMeshView};
use crate::scatter::AtomicSlice;
use crate::tables::HexDegree;
use crate::Real;
use log::{debug, trace};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Controls how cells are distributed among workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Number of consecutive cells processed by a single task.
    pub block_size: usize,
    /// Run on a dedicated pool with this many threads instead of the global rayon pool.
    pub num_threads: Option<usize>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            block_size: 256,
            num_threads: None,
        }
    }
}

impl LaunchConfig {
    /// A configuration that processes cells one by one on a single thread.
    pub fn sequential() -> Self {
        Self {
            block_size: 1,
            num_threads: Some(1),
        }
    }

    pub fn num_blocks(&self, num_cells: usize) -> usize {
        (num_cells + self.block_size - 1) / self.block_size
    }
}

/// Applies the weighted Laplace operator $\int \kappa \nabla u \cdot \nabla v \\, dx$ to a field
/// without assembling a matrix.
///
/// The operator borrows the mesh data for its whole lifetime, so the data can not be mutated
/// while the operator exists.
///
/// # Examples
///
/// ```rust
/// use fenris_matfree::operator::MatFreeLaplace;
/// use fenris_matfree::procedural::create_unit_box_hex_mesh;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mesh = create_unit_box_hex_mesh::<f64>(4, 2)?;
/// let constants = [1.0];
/// let laplace = MatFreeLaplace::from_view(2, &mesh.view(&constants))?;
///
/// let u = vec![1.0; mesh.num_dofs()];
/// let mut y = vec![0.0; mesh.num_dofs()];
/// laplace.apply(&u, &mut y)?;
/// assert!(y.iter().all(|y_i| y_i.abs() < 1e-12));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MatFreeLaplace<'a, T: Real> {
    kernel: HexKernel<T>,
    mesh: HexMeshView<'a, T>,
    required_dofs: usize,
    config: LaunchConfig,
    pool: Option<ThreadPool>,
}

impl<'a, T: Real> MatFreeLaplace<'a, T> {
    /// Constructs an operator of the given polynomial degree.
    ///
    /// The mesh is validated once: array sizes, geometry indices and positive Jacobian
    /// determinants at all quadrature points.
    pub fn new(
        degree: usize,
        num_cells: usize,
        constants: &'a [T],
        x: &'a [T],
        x_dofmap: &'a [usize],
        dofmap: &'a [usize],
    ) -> Result<Self, OperatorError> {
        let mesh = HexMeshView {
            num_cells,
            constants,
            x,
            x_dofmap,
            dofmap,
        };
        Self::from_view(degree, &mesh)
    }

    pub fn from_view(degree: usize, mesh: &HexMeshView<'a, T>) -> Result<Self, OperatorError> {
        let degree = HexDegree::try_from(degree)?;
        let required_dofs = validate_mesh(mesh, degree)?;
        Ok(Self::from_parts(degree, *mesh, required_dofs))
    }

    /// Like [`from_view`](Self::from_view), but skips the geometric validity check.
    ///
    /// Array sizes and indices are still checked. Inverted cells silently contribute with
    /// $|\det J|$.
    pub fn from_view_unchecked_geometry(degree: usize, mesh: &HexMeshView<'a, T>) -> Result<Self, OperatorError> {
        let degree = HexDegree::try_from(degree)?;
        let required_dofs = validate_structure(mesh, degree)?;
        Ok(Self::from_parts(degree, *mesh, required_dofs))
    }

    fn from_parts(degree: HexDegree, mesh: HexMeshView<'a, T>, required_dofs: usize) -> Self {
        debug!("Constructed {} matrix-free Laplace operator on {} cells", degree, mesh.num_cells);
        Self {
            kernel: HexKernel::new(degree),
            mesh,
            required_dofs,
            config: LaunchConfig::default(),
            pool: None,
        }
    }

    pub fn with_launch_config(mut self, config: LaunchConfig) -> Result<Self, OperatorError> {
        if config.block_size == 0 {
            return Err(ConfigurationError::InvalidBlockSize.into());
        }
        self.pool = match config.num_threads {
            Some(num_threads) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(LaunchError::from)?;
                Some(pool)
            }
            None => None,
        };
        self.config = config;
        Ok(self)
    }

    pub fn degree(&self) -> HexDegree {
        self.kernel.degree()
    }

    pub fn num_cells(&self) -> usize {
        self.mesh.num_cells
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.degree().nodes_per_cell()
    }

    /// The minimum length of input and output vectors.
    pub fn num_dofs_required(&self) -> usize {
        self.required_dofs
    }

    pub fn launch_config(&self) -> &LaunchConfig {
        &self.config
    }

    pub fn mesh(&self) -> &HexMeshView<'a, T> {
        &self.mesh
    }

    pub fn kernel(&self) -> &HexKernel<T> {
        &self.kernel
    }

    /// Accumulates the operator applied to `input` into `output`.
    ///
    /// Contributions are *added* to `output`, which must be zeroed beforehand if the plain
    /// operator action is desired. If an error is returned, the contents of `output` are
    /// unspecified.
    pub fn apply(&self, input: &[T], output: &mut [T]) -> Result<(), OperatorError> {
        if input.len() != output.len() {
            return Err(OperatorError::DimensionMismatch {
                input: input.len(),
                output: output.len(),
            });
        }
        self.check_field_len(input.len())?;

        let output = AtomicSlice::from_mut_slice(output)?;
        let inputs = self.cell_inputs(input);

        trace!(
            "Applying {} operator to {} cells in {} blocks",
            self.degree(),
            self.num_cells(),
            self.config.num_blocks(self.num_cells())
        );
        match &self.kernel {
            HexKernel::Q1(tables) => self.launch(|cell| apply_cell(tables, &inputs, &output, cell)),
            HexKernel::Q2(tables) => self.launch(|cell| apply_cell(tables, &inputs, &output, cell)),
        }
    }

    /// Accumulates the diagonal of the operator into `output`, cell by cell, without forming
    /// any matrix.
    ///
    /// As with [`apply`](Self::apply), contributions are *added* to `output`.
    pub fn diagonal(&self, output: &mut [T]) -> Result<(), OperatorError> {
        self.check_field_len(output.len())?;
        let output = AtomicSlice::from_mut_slice(output)?;
        let inputs = self.cell_inputs(&[]);

        trace!("Computing {} diagonal on {} cells", self.degree(), self.num_cells());
        match &self.kernel {
            HexKernel::Q1(tables) => self.launch(|cell| apply_cell_diagonal(tables, &inputs, &output, cell)),
            HexKernel::Q2(tables) => self.launch(|cell| apply_cell_diagonal(tables, &inputs, &output, cell)),
        }
    }

    fn check_field_len(&self, len: usize) -> Result<(), MeshError> {
        if len < self.required_dofs {
            return Err(MeshError::FieldIndexOutOfBounds {
                required: self.required_dofs,
                len,
            });
        }
        Ok(())
    }

    fn cell_inputs<'w>(&self, w: &'w [T]) -> CellInputs<'w, T>
    where
        'a: 'w,
    {
        CellInputs {
            kappa: self.mesh.constants[0],
            x: self.mesh.x,
            x_dofmap: self.mesh.x_dofmap,
            dofmap: self.mesh.dofmap,
            w,
        }
    }

    /// Runs `cell_kernel` on every cell, in blocks of consecutive cells distributed over the
    /// configured pool.
    fn launch(&self, cell_kernel: impl Fn(usize) + Sync) -> Result<(), OperatorError> {
        let num_cells = self.num_cells();
        let block_size = self.config.block_size;
        let launch_blocks = || {
            (0..self.config.num_blocks(num_cells))
                .into_par_iter()
                .for_each(|block| {
                    let begin = block * block_size;
                    let end = usize::min(begin + block_size, num_cells);
                    for cell in begin..end {
                        cell_kernel(cell);
                    }
                })
        };
        let result = match &self.pool {
            Some(pool) => pool.install(|| catch_unwind(AssertUnwindSafe(launch_blocks))),
            None => catch_unwind(AssertUnwindSafe(launch_blocks)),
        };
        result.map_err(|_| LaunchError::WorkerPanicked)?;
        Ok(())
    }
}
