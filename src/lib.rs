//! Matrix-free evaluation of the weighted Laplace operator on hexahedral meshes.
//!
//! The central type is [`MatFreeLaplace`](operator::MatFreeLaplace), which applies
//! $\int \kappa \nabla u \cdot \nabla v \\, dx$ to a coefficient field without ever forming the
//! global matrix. Each cell is evaluated independently with sum-factorized tensor-product
//! kernels and its contributions are scattered into the output with atomic additions.
use nalgebra::RealField;

pub mod assembly;
pub mod cg;
pub mod error;
pub mod gather;
pub mod kernel;
pub mod mesh;
pub mod multigrid;
pub mod operator;
pub mod procedural;
pub mod scatter;
pub mod tables;
pub mod telemetry;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

use crate::scatter::AtomicScalar;

/// Scalar type used throughout the kernels.
///
/// Used as a trait alias for the traits needed by the operator: real arithmetic, cheap copies
/// and an atomic addition primitive.
pub trait Real: RealField + Copy + AtomicScalar + Send + Sync {}

impl<T> Real for T where T: RealField + Copy + AtomicScalar + Send + Sync {}
