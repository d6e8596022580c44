//! Borrowed mesh data and its validation.
//!
//! The kernels index global arrays without any checks beyond slice bounds checks, and they use
//! $|\det J|$ as volume scaling. Validity of the mesh is therefore established once, before any
//! operator is applied, by the functions in this module.
use crate::error::MeshError;
use crate::gather::gather_coordinates;
use crate::kernel::{evaluate_jacobian, jacobian_determinant};
use crate::tables::{HexDegree, Q1Tables, Q2Tables, TensorTables, GEOMETRY_NODES};
use crate::Real;
use log::debug;
use rayon::prelude::*;

/// Read-only view of the data describing a hexahedral mesh and its field discretization.
#[derive(Debug, Clone, Copy)]
pub struct HexMeshView<'a, T> {
    pub num_cells: usize,
    /// Material constants. Only the first entry, $\kappa$, is used.
    pub constants: &'a [T],
    /// Corner coordinates, three components per geometry node.
    pub x: &'a [T],
    /// Eight geometry node indices per cell.
    pub x_dofmap: &'a [usize],
    /// `(degree + 1)^3` field dof indices per cell.
    pub dofmap: &'a [usize],
}

/// A cell count whose dofmap length overflows `usize` is reported with `expected == usize::MAX`.
fn check_dofmap_length(
    name: &'static str,
    nodes_per_cell: usize,
    num_cells: usize,
    actual: usize,
) -> Result<(), MeshError> {
    match nodes_per_cell.checked_mul(num_cells) {
        Some(expected) if expected == actual => Ok(()),
        expected => Err(MeshError::DofmapLength {
            name,
            expected: expected.unwrap_or(usize::MAX),
            actual,
        }),
    }
}

/// Checks the sizes of all arrays and the range of geometry indices.
///
/// Returns the minimum length of field vectors, i.e. one past the largest field dof index.
pub fn validate_structure<T>(mesh: &HexMeshView<T>, degree: HexDegree) -> Result<usize, MeshError> {
    if mesh.constants.is_empty() {
        return Err(MeshError::MissingConstant);
    }

    if mesh.x.len() % 3 != 0 {
        return Err(MeshError::GeometryLength { len: mesh.x.len() });
    }

    check_dofmap_length("geometry dofmap", GEOMETRY_NODES, mesh.num_cells, mesh.x_dofmap.len())?;
    check_dofmap_length("field dofmap", degree.nodes_per_cell(), mesh.num_cells, mesh.dofmap.len())?;

    let num_nodes = mesh.x.len() / 3;
    if let Some(position) = mesh.x_dofmap.iter().position(|&node| node >= num_nodes) {
        return Err(MeshError::GeometryIndexOutOfBounds {
            cell: position / GEOMETRY_NODES,
            index: mesh.x_dofmap[position],
            num_nodes,
        });
    }

    let required_dofs = mesh.dofmap.iter().max().map(|&max| max + 1).unwrap_or(0);
    Ok(required_dofs)
}

fn find_inverted_cell<T: Real, const P: usize, const Q: usize>(
    tables: &TensorTables<T, P, Q>,
    mesh: &HexMeshView<T>,
) -> Option<MeshError> {
    (0..mesh.num_cells).into_par_iter().find_map_first(|cell| {
        let coordinates = gather_coordinates(mesh.x, mesh.x_dofmap, cell);
        TensorTables::<T, P, Q>::quadrature_points().find_map(|q| {
            let det = jacobian_determinant(&evaluate_jacobian(tables, &coordinates, q));
            // Written so that NaN determinants are rejected too
            if !(det > T::zero()) {
                Some(MeshError::InvertedCell {
                    cell,
                    quadrature_point: q,
                    det: det.to_subset().unwrap_or(f64::NAN),
                })
            } else {
                None
            }
        })
    })
}

/// Checks that the Jacobian determinant is positive at every quadrature point of every cell.
///
/// The structure of the mesh must have been validated with [`validate_structure`]. If several
/// cells are invalid, the error refers to the one with the lowest index.
pub fn validate_geometry<T: Real>(mesh: &HexMeshView<T>, degree: HexDegree) -> Result<(), MeshError> {
    let inverted = match degree {
        HexDegree::Q1 => find_inverted_cell(&Q1Tables::q1(), mesh),
        HexDegree::Q2 => find_inverted_cell(&Q2Tables::q2(), mesh),
    };
    match inverted {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Runs [`validate_structure`] followed by [`validate_geometry`].
pub fn validate_mesh<T: Real>(mesh: &HexMeshView<T>, degree: HexDegree) -> Result<usize, MeshError> {
    let required_dofs = validate_structure(mesh, degree)?;
    validate_geometry(mesh, degree)?;
    debug!(
        "Validated {} mesh with {} cells ({} field dofs required)",
        degree, mesh.num_cells, required_dofs
    );
    Ok(required_dofs)
}
