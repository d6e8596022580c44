use crate::procedural::HexMesh;
use crate::tables::HexDegree;
use ::proptest::collection::vec;
use ::proptest::prelude::*;

/// Parameters for generating structured, smoothly distorted hexahedral meshes.
#[derive(Debug, Clone)]
pub struct HexMeshParams {
    pub degree: HexDegree,
    pub max_cells_per_dim: usize,
    /// Upper bound of the interior vertex perturbation, see
    /// [`HexMesh::perturb_interior_vertices`].
    pub max_perturbation: f64,
}

impl Default for HexMeshParams {
    fn default() -> Self {
        Self {
            degree: HexDegree::Q1,
            max_cells_per_dim: 3,
            max_perturbation: 0.15,
        }
    }
}

impl HexMeshParams {
    pub fn with_degree(self, degree: HexDegree) -> Self {
        Self { degree, ..self }
    }

    pub fn with_max_cells_per_dim(self, max_cells_per_dim: usize) -> Self {
        Self {
            max_cells_per_dim,
            ..self
        }
    }
}

impl Arbitrary for HexMesh<f64> {
    type Parameters = HexMeshParams;
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(params: Self::Parameters) -> Self::Strategy {
        let cells = 1..=params.max_cells_per_dim.max(1);
        // Keep aspect ratios moderate so that the perturbation bound stays meaningful
        let extent = 0.5..2.0;
        let degree = params.degree;
        (
            [cells.clone(), cells.clone(), cells],
            [extent.clone(), extent.clone(), extent],
            0.0..=params.max_perturbation,
        )
            .prop_map(move |(cells_per_dim, extents, amplitude)| {
                let mut mesh = HexMesh::from_box(extents, cells_per_dim, degree);
                mesh.perturb_interior_vertices(amplitude);
                mesh
            })
            .boxed()
    }
}

/// A field with one value per dof of the mesh.
pub fn field(num_dofs: usize) -> impl Strategy<Value = Vec<f64>> {
    vec(-10.0..10.0, num_dofs)
}

/// A mesh together with two fields on it.
pub fn hex_mesh_with_fields(params: HexMeshParams) -> impl Strategy<Value = (HexMesh<f64>, Vec<f64>, Vec<f64>)> {
    any_with::<HexMesh<f64>>(params).prop_flat_map(|mesh| {
        let n = mesh.num_dofs();
        (Just(mesh), field(n), field(n))
    })
}
