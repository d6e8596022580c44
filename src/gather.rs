//! Gathering of per-cell data from global arrays.
//!
//! Local node `(i0, i1, i2)` of a cell with `P` nodes per direction is stored at position
//! `P * P * i0 + P * i1 + i2` of the cell's dofmap entries, and local buffers are indexed
//! `[i0][i1][i2]` accordingly.
//!
//! Indices are not checked beyond the bounds checks of slice indexing. Callers are expected to
//! have validated the dofmaps with [`validate_structure`](crate::mesh::validate_structure).
use crate::tables::GEOMETRY_NODES;
use num::Zero;

/// Corner coordinates of a single cell, `[corner][component]`.
pub type CellCoordinates<T> = [[T; 3]; GEOMETRY_NODES];

/// Nodal values of a single cell, indexed by the 3D local node index.
pub type CellTensor<T, const P: usize> = [[[T; P]; P]; P];

/// Reads the corner coordinates of `cell` through the geometry dofmap.
#[inline]
pub fn gather_coordinates<T: Copy + Zero>(x: &[T], x_dofmap: &[usize], cell: usize) -> CellCoordinates<T> {
    let cell_nodes = &x_dofmap[GEOMETRY_NODES * cell..GEOMETRY_NODES * (cell + 1)];
    let mut coordinates = [[T::zero(); 3]; GEOMETRY_NODES];
    for (local, &node) in cell_nodes.iter().enumerate() {
        coordinates[local] = [x[3 * node], x[3 * node + 1], x[3 * node + 2]];
    }
    coordinates
}

/// Reads the field values of `cell` through the field dofmap.
#[inline]
pub fn gather_coefficients<T: Copy, const P: usize>(
    w: &[T],
    dofmap: &[usize],
    cell: usize,
    output: &mut CellTensor<T, P>,
) {
    let n = P * P * P;
    let cell_dofs = &dofmap[n * cell..n * (cell + 1)];
    for (i0, plane) in output.iter_mut().enumerate() {
        for (i1, row) in plane.iter_mut().enumerate() {
            for (i2, value) in row.iter_mut().enumerate() {
                *value = w[cell_dofs[P * P * i0 + P * i1 + i2]];
            }
        }
    }
}

/// Flattens a local tensor into the dofmap ordering.
pub fn flatten_cell_tensor<T: Copy, const P: usize>(tensor: &CellTensor<T, P>) -> Vec<T> {
    tensor.iter().flatten().flatten().copied().collect()
}
