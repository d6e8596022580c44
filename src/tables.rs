//! Basis and quadrature tables for tensor-product hexahedral elements.
//!
//! All tables are tabulated on the reference cell $[0, 1]^3$. For every polynomial degree we
//! store the 1D Lagrange basis values and derivatives at the 1D Gauss points, both for the field
//! basis and for the (always trilinear) geometry basis, together with the flattened 3D
//! quadrature weights.
//!
//! The 1D nodes are ordered with the end points first: degree 1 uses the nodes $[0, 1]$ and
//! degree 2 the nodes $[0, 1, 1/2]$.
use crate::error::ConfigurationError;
use crate::Real;
use std::convert::TryFrom;
use std::fmt;

/// Polynomial degree of the field basis.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HexDegree {
    /// Trilinear, 8 nodes per cell.
    Q1,
    /// Triquadratic, 27 nodes per cell.
    Q2,
}

impl HexDegree {
    pub fn degree(&self) -> usize {
        match self {
            Self::Q1 => 1,
            Self::Q2 => 2,
        }
    }

    /// Number of field nodes along each reference direction.
    pub fn nodes_per_dim(&self) -> usize {
        self.degree() + 1
    }

    /// Number of field nodes of a single cell.
    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_dim().pow(3)
    }

    /// Number of Gauss points along each reference direction.
    pub fn quadrature_points_per_dim(&self) -> usize {
        match self {
            Self::Q1 => 3,
            Self::Q2 => 4,
        }
    }

    /// Offset of each 1D local node on a structured grid with `degree + 1` points per cell.
    pub fn node_grid_offsets(&self) -> &'static [usize] {
        match self {
            Self::Q1 => &[0, 1],
            Self::Q2 => &[0, 2, 1],
        }
    }
}

impl TryFrom<usize> for HexDegree {
    type Error = ConfigurationError;

    fn try_from(degree: usize) -> Result<Self, Self::Error> {
        match degree {
            1 => Ok(Self::Q1),
            2 => Ok(Self::Q2),
            _ => Err(ConfigurationError::UnsupportedDegree { degree }),
        }
    }
}

impl fmt::Display for HexDegree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.degree())
    }
}

/// Number of corner nodes of the trilinear geometry map.
pub const GEOMETRY_NODES: usize = 8;

/// Gauss points on $[0, 1]$ with 3 points.
pub const GAUSS_POINTS_3: [f64; 3] = [0.1127016653792582, 0.5, 0.8872983346207417];

/// Gauss points on $[0, 1]$ with 4 points.
pub const GAUSS_POINTS_4: [f64; 4] = [
    0.06943184420297371,
    0.3300094782075719,
    0.6699905217924281,
    0.9305681557970262,
];

// Q1 field basis, which doubles as the geometry basis at the 3 point rule.
const Q1_PHI: [[f64; 2]; 3] = [
    [0.8872983346207417, 0.1127016653792582],
    [0.5, 0.5],
    [0.1127016653792582, 0.8872983346207417],
];

const Q1_DPHI: [[f64; 2]; 3] = [[-1.0, 1.0], [-1.0, 1.0], [-1.0, 1.0]];

#[rustfmt::skip]
const Q1_WEIGHTS: [f64; 27] = [
    0.02143347050754454, 0.03429355281207129, 0.02143347050754456, 0.03429355281207129,
    0.05486968449931409, 0.03429355281207132, 0.02143347050754457, 0.03429355281207132,
    0.02143347050754458, 0.03429355281207129, 0.05486968449931409, 0.03429355281207132,
    0.05486968449931409, 0.0877914951989026,  0.05486968449931414, 0.03429355281207132,
    0.05486968449931413, 0.03429355281207135, 0.02143347050754457, 0.03429355281207132,
    0.02143347050754458, 0.03429355281207132, 0.05486968449931413, 0.03429355281207135,
    0.02143347050754458, 0.03429355281207135, 0.0214334705075446,
];

const Q2_PHI: [[f64; 3]; 4] = [
    [0.8013460293699309, -0.05979028222412167, 0.2584442528541908],
    [0.227784076790952, -0.1121969667939042, 0.884412890002952],
    [-0.1121969667939043, 0.2277840767909521, 0.884412890002952],
    [-0.05979028222412186, 0.8013460293699308, 0.258444252854191],
];

const Q2_DPHI: [[f64; 3]; 4] = [
    [-2.722272623188105, -0.7222726231881051, 3.44454524637621],
    [-1.679962087169713, 0.3200379128302875, 1.359924174339425],
    [-0.3200379128302875, 1.679962087169713, -1.359924174339425],
    [0.7222726231881049, 2.722272623188105, -3.444545246376209],
];

// Trilinear geometry basis at the 4 point rule
const Q2_GEOMETRY_PHI: [[f64; 2]; 4] = [
    [0.9305681557970263, 0.06943184420297366],
    [0.6699905217924281, 0.3300094782075719],
    [0.3300094782075719, 0.6699905217924281],
    [0.06943184420297371, 0.9305681557970262],
];

const Q2_GEOMETRY_DPHI: [[f64; 2]; 4] = [[-1.0, 1.0], [-1.0, 1.0], [-1.0, 1.0], [-1.0, 1.0]];

#[rustfmt::skip]
const Q2_WEIGHTS: [f64; 64] = [
    0.005261434686316431, 0.009863939474383817, 0.009863939474383819, 0.00526143468631643,
    0.009863939474383817, 0.01849254200709766,  0.01849254200709766,  0.009863939474383814,
    0.009863939474383819, 0.01849254200709766,  0.01849254200709766,  0.009863939474383816,
    0.00526143468631643,  0.009863939474383814, 0.009863939474383816, 0.005261434686316428,
    0.009863939474383817, 0.01849254200709766,  0.01849254200709766,  0.009863939474383814,
    0.01849254200709766,  0.03466912086923912,  0.03466912086923912,  0.01849254200709765,
    0.01849254200709766,  0.03466912086923912,  0.03466912086923913,  0.01849254200709766,
    0.009863939474383814, 0.01849254200709765,  0.01849254200709766,  0.00986393947438381,
    0.009863939474383819, 0.01849254200709766,  0.01849254200709766,  0.009863939474383816,
    0.01849254200709766,  0.03466912086923912,  0.03466912086923913,  0.01849254200709766,
    0.01849254200709766,  0.03466912086923912,  0.03466912086923913,  0.01849254200709766,
    0.009863939474383817, 0.01849254200709766,  0.01849254200709766,  0.009863939474383814,
    0.00526143468631643,  0.009863939474383814, 0.009863939474383816, 0.005261434686316428,
    0.009863939474383814, 0.01849254200709765,  0.01849254200709766,  0.00986393947438381,
    0.009863939474383817, 0.01849254200709766,  0.01849254200709766,  0.009863939474383814,
    0.005261434686316428, 0.00986393947438381,  0.009863939474383812, 0.005261434686316426,
];

/// Tabulated 1D basis functions and 3D quadrature weights for one polynomial degree.
///
/// `P` is the number of field nodes and `Q` the number of quadrature points per direction.
/// Tables are indexed `[quadrature point][node]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorTables<T, const P: usize, const Q: usize> {
    phi: [[T; P]; Q],
    dphi: [[T; P]; Q],
    geometry_phi: [[T; 2]; Q],
    geometry_dphi: [[T; 2]; Q],
    weights: [[[T; Q]; Q]; Q],
}

pub type Q1Tables<T> = TensorTables<T, 2, 3>;
pub type Q2Tables<T> = TensorTables<T, 3, 4>;

fn convert_table<T: Real, const N: usize, const M: usize>(table: &[[f64; N]; M]) -> [[T; N]; M] {
    table.map(|row| row.map(nalgebra::convert))
}

fn unflatten_weights<T: Real, const Q: usize>(flat: &[f64]) -> [[[T; Q]; Q]; Q] {
    debug_assert_eq!(flat.len(), Q * Q * Q);
    let mut weights = [[[T::zero(); Q]; Q]; Q];
    for (q0, plane) in weights.iter_mut().enumerate() {
        for (q1, row) in plane.iter_mut().enumerate() {
            for (q2, w) in row.iter_mut().enumerate() {
                *w = nalgebra::convert(flat[Q * Q * q0 + Q * q1 + q2]);
            }
        }
    }
    weights
}

impl<T: Real> TensorTables<T, 2, 3> {
    pub fn q1() -> Self {
        Self {
            phi: convert_table(&Q1_PHI),
            dphi: convert_table(&Q1_DPHI),
            geometry_phi: convert_table(&Q1_PHI),
            geometry_dphi: convert_table(&Q1_DPHI),
            weights: unflatten_weights(&Q1_WEIGHTS),
        }
    }
}

impl<T: Real> TensorTables<T, 3, 4> {
    pub fn q2() -> Self {
        Self {
            phi: convert_table(&Q2_PHI),
            dphi: convert_table(&Q2_DPHI),
            geometry_phi: convert_table(&Q2_GEOMETRY_PHI),
            geometry_dphi: convert_table(&Q2_GEOMETRY_DPHI),
            weights: unflatten_weights(&Q2_WEIGHTS),
        }
    }
}

impl<T: Copy, const P: usize, const Q: usize> TensorTables<T, P, Q> {
    /// Field basis values, `phi()[q][i]` is $\phi_i(\xi_q)$.
    pub fn phi(&self) -> &[[T; P]; Q] {
        &self.phi
    }

    /// Field basis derivatives, `dphi()[q][i]` is $\phi_i'(\xi_q)$.
    pub fn dphi(&self) -> &[[T; P]; Q] {
        &self.dphi
    }

    pub fn geometry_phi(&self) -> &[[T; 2]; Q] {
        &self.geometry_phi
    }

    pub fn geometry_dphi(&self) -> &[[T; 2]; Q] {
        &self.geometry_dphi
    }

    /// Quadrature weights indexed by the 3D quadrature point.
    pub fn weights(&self) -> &[[[T; Q]; Q]; Q] {
        &self.weights
    }

    pub fn weight(&self, [q0, q1, q2]: [usize; 3]) -> T {
        self.weights[q0][q1][q2]
    }

    /// Iterates over all 3D quadrature points in row-major order.
    pub fn quadrature_points() -> impl Iterator<Item = [usize; 3]> {
        (0..Q).flat_map(|q0| (0..Q).flat_map(move |q1| (0..Q).map(move |q2| [q0, q1, q2])))
    }
}
