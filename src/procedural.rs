//! Procedural generation of structured hexahedral meshes.
//!
//! The generated dofmaps follow the local node ordering expected by the kernels: corner
//! `(i0, i1, i2)` of a cell lies at offset `i0` along $x$, `i1` along $y$ and `i2` along $z$.
//! Geometry nodes and field dofs are both numbered lexicographically with $x$ running fastest.
use crate::error::ConfigurationError;
use crate::mesh::HexMeshView;
use crate::tables::{HexDegree, GEOMETRY_NODES};
use crate::Real;
use nalgebra::{convert, Point3, Vector3};
use numeric_literals::replace_float_literals;
use std::convert::TryFrom;

/// An owned structured hexahedral mesh with a continuous Lagrange field discretization.
#[derive(Debug, Clone, PartialEq)]
pub struct HexMesh<T> {
    degree: HexDegree,
    cells_per_dim: [usize; 3],
    extents: [T; 3],
    coordinates: Vec<T>,
    x_dofmap: Vec<usize>,
    dofmap: Vec<usize>,
}

/// Creates a mesh of the unit cube $[0, 1]^3$ with `cells_per_dim` cells along every axis.
pub fn create_unit_box_hex_mesh<T: Real>(
    cells_per_dim: usize,
    degree: usize,
) -> Result<HexMesh<T>, ConfigurationError> {
    create_box_hex_mesh([T::one(); 3], [cells_per_dim; 3], degree)
}

/// Creates a uniform mesh of the box $[0, L_x] \times [0, L_y] \times [0, L_z]$.
pub fn create_box_hex_mesh<T: Real>(
    extents: [T; 3],
    cells_per_dim: [usize; 3],
    degree: usize,
) -> Result<HexMesh<T>, ConfigurationError> {
    let degree = HexDegree::try_from(degree)?;
    Ok(HexMesh::from_box(extents, cells_per_dim, degree))
}

impl<T: Real> HexMesh<T> {
    /// Uniform mesh of the box with the given extents and number of cells per axis.
    pub fn from_box(extents: [T; 3], cells_per_dim: [usize; 3], degree: HexDegree) -> Self {
        let [nx, ny, nz] = cells_per_dim;
        let num_cells = nx * ny * nz;

        // Geometry nodes
        let vertex_dims = [nx + 1, ny + 1, nz + 1];
        let vertex_index = |i: usize, j: usize, k: usize| i + vertex_dims[0] * (j + vertex_dims[1] * k);
        let mut coordinates = Vec::with_capacity(3 * vertex_dims.iter().product::<usize>());
        if num_cells > 0 {
            for k in 0..vertex_dims[2] {
                for j in 0..vertex_dims[1] {
                    for i in 0..vertex_dims[0] {
                        let fraction = |idx: usize, n: usize| -> T { convert::<f64, T>(idx as f64 / n as f64) };
                        coordinates.push(extents[0] * fraction(i, nx));
                        coordinates.push(extents[1] * fraction(j, ny));
                        coordinates.push(extents[2] * fraction(k, nz));
                    }
                }
            }
        }

        // Field dofs live on a grid with `degree` intervals per cell
        let p = degree.degree();
        let dof_dims = [p * nx + 1, p * ny + 1, p * nz + 1];
        let dof_index = |i: usize, j: usize, k: usize| i + dof_dims[0] * (j + dof_dims[1] * k);
        let offsets = degree.node_grid_offsets();

        let mut x_dofmap = Vec::with_capacity(GEOMETRY_NODES * num_cells);
        let mut dofmap = Vec::with_capacity(degree.nodes_per_cell() * num_cells);
        for ez in 0..nz {
            for ey in 0..ny {
                for ex in 0..nx {
                    for i0 in 0..2 {
                        for i1 in 0..2 {
                            for i2 in 0..2 {
                                x_dofmap.push(vertex_index(ex + i0, ey + i1, ez + i2));
                            }
                        }
                    }
                    for &o0 in offsets {
                        for &o1 in offsets {
                            for &o2 in offsets {
                                dofmap.push(dof_index(p * ex + o0, p * ey + o1, p * ez + o2));
                            }
                        }
                    }
                }
            }
        }

        Self {
            degree,
            cells_per_dim,
            extents,
            coordinates,
            x_dofmap,
            dofmap,
        }
    }

    pub fn degree(&self) -> HexDegree {
        self.degree
    }

    pub fn cells_per_dim(&self) -> [usize; 3] {
        self.cells_per_dim
    }

    pub fn num_cells(&self) -> usize {
        self.cells_per_dim.iter().product()
    }

    /// Number of field dofs per axis of the structured dof grid.
    pub fn dofs_per_dim(&self) -> [usize; 3] {
        let p = self.degree.degree();
        self.cells_per_dim.map(|n| if n == 0 { 0 } else { p * n + 1 })
    }

    pub fn num_dofs(&self) -> usize {
        self.dofs_per_dim().iter().product()
    }

    pub fn num_vertices(&self) -> usize {
        self.coordinates.len() / 3
    }

    pub fn coordinates(&self) -> &[T] {
        &self.coordinates
    }

    pub fn vertex(&self, index: usize) -> Point3<T> {
        Point3::new(
            self.coordinates[3 * index],
            self.coordinates[3 * index + 1],
            self.coordinates[3 * index + 2],
        )
    }

    pub fn geometry_dofmap(&self) -> &[usize] {
        &self.x_dofmap
    }

    pub fn dofmap(&self) -> &[usize] {
        &self.dofmap
    }

    /// Borrows the mesh data together with the given material constants.
    pub fn view<'a>(&'a self, constants: &'a [T]) -> HexMeshView<'a, T> {
        HexMeshView {
            num_cells: self.num_cells(),
            constants,
            x: &self.coordinates,
            x_dofmap: &self.x_dofmap,
            dofmap: &self.dofmap,
        }
    }

    /// Indices of all field dofs on the boundary of the box.
    pub fn boundary_dofs(&self) -> Vec<usize> {
        let [mx, my, mz] = self.dofs_per_dim();
        let mut dofs = Vec::new();
        for k in 0..mz {
            for j in 0..my {
                for i in 0..mx {
                    let on_boundary =
                        i == 0 || j == 0 || k == 0 || i + 1 == mx || j + 1 == my || k + 1 == mz;
                    if on_boundary {
                        dofs.push(i + mx * (j + my * k));
                    }
                }
            }
        }
        dofs
    }

    /// Physical positions of all field dofs.
    ///
    /// Each dof is mapped through the trilinear geometry map of one of the cells containing it,
    /// which is well-defined since neighboring cells agree on shared faces.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn dof_coordinates(&self) -> Vec<Point3<T>> {
        let n = self.degree.nodes_per_dim();
        let reference_nodes: Vec<T> = match self.degree {
            HexDegree::Q1 => vec![0.0, 1.0],
            HexDegree::Q2 => vec![0.0, 1.0, 0.5],
        };
        let mut points = vec![Point3::origin(); self.num_dofs()];
        for cell in 0..self.num_cells() {
            let corners = &self.x_dofmap[GEOMETRY_NODES * cell..GEOMETRY_NODES * (cell + 1)];
            let cell_dofs = &self.dofmap[n * n * n * cell..n * n * n * (cell + 1)];
            for i0 in 0..n {
                for i1 in 0..n {
                    for i2 in 0..n {
                        let xi = [reference_nodes[i0], reference_nodes[i1], reference_nodes[i2]];
                        let mut x = Vector3::zeros();
                        for c0 in 0..2 {
                            for c1 in 0..2 {
                                for c2 in 0..2 {
                                    let linear = |c: usize, xi: T| if c == 0 { 1.0 - xi } else { xi };
                                    let phi = linear(c0, xi[0]) * linear(c1, xi[1]) * linear(c2, xi[2]);
                                    x += self.vertex(corners[4 * c0 + 2 * c1 + c2]).coords * phi;
                                }
                            }
                        }
                        points[cell_dofs[n * n * i0 + n * i1 + i2]] = Point3::from(x);
                    }
                }
            }
        }
        points
    }

    /// Smoothly displaces the interior vertices, producing non-affine cells.
    ///
    /// Vertex $x$ moves by `amplitude * h` times a product of sines that vanishes on the boundary
    /// of the box, where $h$ is the smallest cell size. Every edge then deviates from its
    /// unperturbed direction by at most `2 * amplitude * h` per component, so amplitudes below
    /// `1/6` keep the Jacobian diagonally dominant and all cells valid.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn perturb_interior_vertices(&mut self, amplitude: T) {
        let pi = T::pi();
        let [hx, hy, hz] = [0, 1, 2].map(|d| self.extents[d] / convert::<f64, T>(self.cells_per_dim[d].max(1) as f64));
        let h = hx.min(hy).min(hz);
        for vertex in self.coordinates.chunks_exact_mut(3) {
            let s = [
                (pi * vertex[0] / self.extents[0]).sin(),
                (pi * vertex[1] / self.extents[1]).sin(),
                (pi * vertex[2] / self.extents[2]).sin(),
            ];
            let scale = amplitude * h * s[0] * s[1] * s[2];
            let displacement = [
                scale * (2.0 * pi * vertex[1] / self.extents[1]).sin(),
                scale * (2.0 * pi * vertex[2] / self.extents[2]).sin(),
                scale * (2.0 * pi * vertex[0] / self.extents[0]).sin(),
            ];
            for (x_d, u_d) in vertex.iter_mut().zip(displacement) {
                *x_d += u_d;
            }
        }
    }

    /// Replaces the coordinates of all geometry nodes.
    ///
    /// # Panics
    ///
    /// Panics if the number of coordinates changes.
    pub fn set_coordinates(&mut self, coordinates: Vec<T>) {
        assert_eq!(coordinates.len(), self.coordinates.len(), "Number of coordinates must not change");
        self.coordinates = coordinates;
    }
}
