//! Error types reported by operator construction and application.
use std::error::Error;
use std::fmt;

/// The requested operator can not be configured.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Only degree 1 and degree 2 kernels exist.
    UnsupportedDegree { degree: usize },
    /// The number of cells per block must be positive.
    InvalidBlockSize,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedDegree { degree } => {
                write!(f, "Unsupported polynomial degree {} (supported degrees: 1, 2)", degree)
            }
            Self::InvalidBlockSize => write!(f, "Block size must be at least 1"),
        }
    }
}

impl Error for ConfigurationError {}

/// Launching the parallel cell loop failed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LaunchError {
    /// The dedicated thread pool could not be created.
    ThreadPool(String),
    /// The output buffer does not satisfy the alignment of the atomic scalar type.
    MisalignedOutput,
    /// A worker panicked while processing a block of cells.
    WorkerPanicked,
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadPool(msg) => write!(f, "Failed to build thread pool: {}", msg),
            Self::MisalignedOutput => write!(f, "Output buffer is not aligned for atomic access"),
            Self::WorkerPanicked => write!(f, "A worker panicked during the cell loop"),
        }
    }
}

impl Error for LaunchError {}

impl From<rayon::ThreadPoolBuildError> for LaunchError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(err.to_string())
    }
}

/// The mesh data handed to an operator is not valid.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MeshError {
    /// No material constant was supplied.
    MissingConstant,
    /// A dofmap does not have `nodes_per_cell * num_cells` entries.
    DofmapLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The coordinate array does not hold three components per node.
    GeometryLength { len: usize },
    /// A geometry dofmap entry points past the end of the coordinate array.
    GeometryIndexOutOfBounds { cell: usize, index: usize, num_nodes: usize },
    /// A field vector does not cover every index referenced by the field dofmap.
    FieldIndexOutOfBounds { required: usize, len: usize },
    /// The Jacobian determinant is not positive at some quadrature point.
    InvertedCell {
        cell: usize,
        quadrature_point: [usize; 3],
        det: f64,
    },
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingConstant => write!(f, "No material constant supplied"),
            Self::DofmapLength { name, expected, actual } => {
                write!(f, "{} has {} entries, expected {}", name, actual, expected)
            }
            Self::GeometryLength { len } => {
                write!(f, "Coordinate array length {} is not a multiple of 3", len)
            }
            Self::GeometryIndexOutOfBounds { cell, index, num_nodes } => write!(
                f,
                "Cell {} references geometry node {}, but there are only {} nodes",
                cell, index, num_nodes
            ),
            Self::FieldIndexOutOfBounds { required, len } => write!(
                f,
                "Field vectors must have at least {} entries, but have {}",
                required, len
            ),
            Self::InvertedCell {
                cell,
                quadrature_point,
                det,
            } => write!(
                f,
                "Cell {} has non-positive Jacobian determinant {:e} at quadrature point {:?}",
                cell, det, quadrature_point
            ),
        }
    }
}

impl Error for MeshError {}

/// Errors produced by [`MatFreeLaplace`](crate::operator::MatFreeLaplace).
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum OperatorError {
    Configuration(ConfigurationError),
    Mesh(MeshError),
    Launch(LaunchError),
    /// Input and output vectors differ in length.
    DimensionMismatch { input: usize, output: usize },
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(err) => {
                write!(f, "Invalid operator configuration: ")?;
                err.fmt(f)
            }
            Self::Mesh(err) => {
                write!(f, "Invalid mesh data: ")?;
                err.fmt(f)
            }
            Self::Launch(err) => {
                write!(f, "Kernel launch failed: ")?;
                err.fmt(f)
            }
            Self::DimensionMismatch { input, output } => write!(
                f,
                "Input vector has length {}, but output vector has length {}",
                input, output
            ),
        }
    }
}

impl Error for OperatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Mesh(err) => Some(err),
            Self::Launch(err) => Some(err),
            Self::DimensionMismatch { .. } => None,
        }
    }
}

impl From<ConfigurationError> for OperatorError {
    fn from(err: ConfigurationError) -> Self {
        Self::Configuration(err)
    }
}

impl From<MeshError> for OperatorError {
    fn from(err: MeshError) -> Self {
        Self::Mesh(err)
    }
}

impl From<LaunchError> for OperatorError {
    fn from(err: LaunchError) -> Self {
        Self::Launch(err)
    }
}
