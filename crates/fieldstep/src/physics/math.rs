/// Scalar type for propagation calculations (f64 for precision)
pub type Scalar = f64;

/// 3D vector type for positions, directions, fields and stage derivatives
pub type Vector = nalgebra::Vector3<Scalar>;

/// 3x3 block of a transport Jacobian
pub type Matrix3 = nalgebra::Matrix3<Scalar>;

/// Number of free track parameters carried through a step
///
/// Ordered as position (3), unit direction (3), q/p (1).
pub const FREE_PARAMETERS: usize = 7;

/// Free-parameter transport Jacobian
pub type Jacobian = nalgebra::SMatrix<Scalar, FREE_PARAMETERS, FREE_PARAMETERS>;

/// Free-parameter covariance matrix
pub type Covariance = Jacobian;

/// Row/column offsets of the parameter blocks inside a [`Jacobian`]
pub mod index {
    pub const POSITION: usize = 0;
    pub const DIRECTION: usize = 3;
    pub const QOP: usize = 6;
}

/// Converts a field in tesla into curvature units for `q/p` in e/GeV and
/// lengths in mm: `c` in GeV/(e·T·mm).
pub const FIELD_TO_CURVATURE: Scalar = 0.299_792_458e-3;

/// Transport Jacobian of a straight-line step of length `h`
pub fn free_transport(h: Scalar) -> Jacobian {
    let mut jacobian = Jacobian::identity();
    for i in 0..3 {
        jacobian[(index::POSITION + i, index::DIRECTION + i)] = h;
    }
    jacobian
}

/// Cross every column of `m` with `v`.
pub fn cross_columns(m: &Matrix3, v: &Vector) -> Matrix3 {
    Matrix3::from_columns(&[
        m.column(0).into_owned().cross(v),
        m.column(1).into_owned().cross(v),
        m.column(2).into_owned().cross(v),
    ])
}

/// Total energy for a momentum magnitude and mass.
pub fn energy(momentum: Scalar, mass: Scalar) -> Scalar {
    libm::sqrt(momentum * momentum + mass * mass)
}

/// Momentum magnitude for a total energy and mass, `None` at or below the
/// rest energy.
pub fn momentum_from_energy(energy: Scalar, mass: Scalar) -> Option<Scalar> {
    (energy > mass).then(|| libm::sqrt(energy * energy - mass * mass))
}
