//! Detector geometry codes and the geometry service boundary.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Alignment pad for the TPC field inside a composite plane code.
pub const TPC_PAD: u32 = 10;
/// Alignment pad for the cryostat field inside a composite plane code.
pub const CRYO_PAD: u32 = 10_000;

/// Composite (cryostat, TPC, plane) code.
///
/// Every hit, trajectory point and 2D object carries one of these so
/// that a single integer comparison decides whether two objects live
/// in the same readout plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlaneCode(pub u32);

impl PlaneCode {
    /// Encodes a (cryostat, TPC, plane) triple.
    #[inline]
    #[must_use]
    pub fn encode(cryostat: u32, tpc: u32, plane: u32) -> Self {
        Self(cryostat * CRYO_PAD + tpc * TPC_PAD + plane)
    }

    /// Decodes back into the (cryostat, TPC, plane) triple.
    #[inline]
    #[must_use]
    pub fn decode(self) -> (u32, u32, u32) {
        let cryostat = self.0 / CRYO_PAD;
        let tpc = (self.0 % CRYO_PAD) / TPC_PAD;
        let plane = self.0 % TPC_PAD;
        (cryostat, tpc, plane)
    }

    /// Plane index within the TPC.
    #[inline]
    #[must_use]
    pub fn plane(self) -> u32 {
        self.0 % TPC_PAD
    }

    /// The TPC this plane belongs to.
    #[inline]
    #[must_use]
    pub fn tpc_id(self) -> TpcId {
        let (cryostat, tpc, _) = self.decode();
        TpcId { cryostat, tpc }
    }
}

/// Identifies one TPC drift volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TpcId {
    /// Cryostat index.
    pub cryostat: u32,
    /// TPC index within the cryostat.
    pub tpc: u32,
}

/// Axis-aligned fiducial volume of one TPC (cm).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VolumeBounds {
    /// Drift-coordinate range.
    pub x: (f64, f64),
    /// Vertical range.
    pub y: (f64, f64),
    /// Beam-direction range.
    pub z: (f64, f64),
}

impl VolumeBounds {
    /// True if the position lies inside the volume.
    #[must_use]
    pub fn contains(&self, pos: &[f64; 3]) -> bool {
        pos[0] >= self.x.0
            && pos[0] <= self.x.1
            && pos[1] >= self.y.0
            && pos[1] <= self.y.1
            && pos[2] >= self.z.0
            && pos[2] <= self.z.1
    }
}

/// Geometry queries supplied by the host framework.
///
/// The reconstruction core never hard-codes detector constants; every
/// pitch, angle and coordinate conversion goes through this trait.
pub trait Geometry: Send + Sync {
    /// Number of wire planes in the TPC.
    fn num_planes(&self, tpc: TpcId) -> usize;

    /// Wire pitch (cm) for a plane.
    fn wire_pitch(&self, plane: PlaneCode) -> f64;

    /// Angle of the wires with respect to vertical (radians).
    fn wire_angle(&self, plane: PlaneCode) -> f64;

    /// Converts a hit time (ticks) to the drift coordinate (cm).
    fn drift_coord(&self, plane: PlaneCode, tick: f64) -> f64;

    /// Intersection of two wires from different planes of one TPC,
    /// as a (y, z) position in cm. `None` if the planes are parallel
    /// or belong to different TPCs.
    fn wire_intersection(
        &self,
        plane_a: PlaneCode,
        wire_a: f64,
        plane_b: PlaneCode,
        wire_b: f64,
    ) -> Option<(f64, f64)>;

    /// Wire in `plane` closest to a (y, z) position.
    fn nearest_wire(&self, plane: PlaneCode, y: f64, z: f64) -> f64;

    /// TPC containing a 3D position, if any.
    fn tpc_at(&self, pos: &[f64; 3]) -> Option<TpcId>;

    /// Fiducial bounds of a TPC.
    fn bounds(&self, tpc: TpcId) -> VolumeBounds;
}

/// dE/dx estimation boundary: (dQ/dx, time, plane) -> MeV/cm.
pub trait DedxEstimator: Send + Sync {
    /// Estimates dE/dx from charge per unit length at a given time.
    fn dedx(&self, dqdx: f64, tick: f64, plane: PlaneCode) -> f64;
}

/// Uniform three-plane geometry used by tests and the CLI.
///
/// All planes share one pitch; wire angles follow the common
/// induction/induction/collection arrangement unless overridden.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UniformGeometry {
    /// Wire pitch (cm), identical for all planes.
    pub pitch: f64,
    /// Drift distance per tick (cm).
    pub cm_per_tick: f64,
    /// Wire angle per plane index (radians from vertical).
    pub plane_angles: Vec<f64>,
    /// Shared fiducial volume for every TPC.
    pub volume: VolumeBounds,
}

impl Default for UniformGeometry {
    fn default() -> Self {
        Self {
            pitch: 0.3,
            cm_per_tick: 0.0802,
            plane_angles: vec![
                std::f64::consts::FRAC_PI_3,
                -std::f64::consts::FRAC_PI_3,
                0.0,
            ],
            volume: VolumeBounds {
                x: (0.0, 256.0),
                y: (-116.0, 116.0),
                z: (0.0, 1037.0),
            },
        }
    }
}

impl UniformGeometry {
    /// Direction of increasing wire number in the (y, z) plane.
    fn wire_normal(&self, plane: PlaneCode) -> (f64, f64) {
        let theta = self.plane_angles[plane.plane() as usize % self.plane_angles.len()];
        // wires run at `theta` from vertical; wire number increases
        // along the in-plane normal
        (-theta.sin(), theta.cos())
    }
}

impl Geometry for UniformGeometry {
    fn num_planes(&self, _tpc: TpcId) -> usize {
        self.plane_angles.len()
    }

    fn wire_pitch(&self, _plane: PlaneCode) -> f64 {
        self.pitch
    }

    fn wire_angle(&self, plane: PlaneCode) -> f64 {
        self.plane_angles[plane.plane() as usize % self.plane_angles.len()]
    }

    fn drift_coord(&self, _plane: PlaneCode, tick: f64) -> f64 {
        tick * self.cm_per_tick
    }

    fn wire_intersection(
        &self,
        plane_a: PlaneCode,
        wire_a: f64,
        plane_b: PlaneCode,
        wire_b: f64,
    ) -> Option<(f64, f64)> {
        if plane_a.tpc_id() != plane_b.tpc_id() || plane_a.plane() == plane_b.plane() {
            return None;
        }
        // each wire is the line  n . (y, z) = wire * pitch
        let (nay, naz) = self.wire_normal(plane_a);
        let (nby, nbz) = self.wire_normal(plane_b);
        let det = nay * nbz - naz * nby;
        if det.abs() < 1e-9 {
            return None;
        }
        let ca = wire_a * self.pitch;
        let cb = wire_b * self.pitch;
        let y = (ca * nbz - cb * naz) / det;
        let z = (nay * cb - nby * ca) / det;
        Some((y, z))
    }

    fn nearest_wire(&self, plane: PlaneCode, y: f64, z: f64) -> f64 {
        let (ny, nz) = self.wire_normal(plane);
        ((ny * y + nz * z) / self.pitch).round()
    }

    fn tpc_at(&self, pos: &[f64; 3]) -> Option<TpcId> {
        self.volume.contains(pos).then_some(TpcId::default())
    }

    fn bounds(&self, _tpc: TpcId) -> VolumeBounds {
        self.volume
    }
}

/// Constant-scale dE/dx estimator.
///
/// Multiplies dQ/dx by a single electrons-to-MeV factor with an
/// exponential lifetime correction. Stands in for the host
/// framework's calorimetry service in tests and the CLI.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearDedx {
    /// MeV per charge unit.
    pub mev_per_charge: f64,
    /// Electron lifetime expressed in ticks; `None` disables the
    /// attenuation correction.
    pub lifetime_ticks: Option<f64>,
}

impl Default for LinearDedx {
    fn default() -> Self {
        Self {
            mev_per_charge: 0.0024,
            lifetime_ticks: None,
        }
    }
}

impl DedxEstimator for LinearDedx {
    fn dedx(&self, dqdx: f64, tick: f64, _plane: PlaneCode) -> f64 {
        let correction = match self.lifetime_ticks {
            Some(tau) if tau > 0.0 => (tick / tau).exp(),
            _ => 1.0,
        };
        dqdx * correction * self.mev_per_charge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_code_round_trip() {
        for cryostat in 0..3 {
            for tpc in 0..4 {
                for plane in 0..3 {
                    let code = PlaneCode::encode(cryostat, tpc, plane);
                    assert_eq!(code.decode(), (cryostat, tpc, plane));
                }
            }
        }
    }

    #[test]
    fn test_plane_code_fields() {
        let code = PlaneCode::encode(1, 2, 1);
        assert_eq!(code.0, 10_021);
        assert_eq!(code.plane(), 1);
        assert_eq!(
            code.tpc_id(),
            TpcId {
                cryostat: 1,
                tpc: 2
            }
        );
    }

    #[test]
    fn test_wire_intersection_collection_vertical() {
        let geom = UniformGeometry::default();
        let collection = PlaneCode::encode(0, 0, 2);
        let induction = PlaneCode::encode(0, 0, 0);
        let (y, z) = geom
            .wire_intersection(collection, 100.0, induction, 100.0)
            .unwrap();
        // the collection wire fixes z = wire * pitch
        assert_relative_eq!(z, 30.0, epsilon = 1e-9);
        // nearest_wire must invert the intersection
        assert_relative_eq!(geom.nearest_wire(induction, y, z), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_planes_do_not_intersect() {
        let geom = UniformGeometry::default();
        let p = PlaneCode::encode(0, 0, 1);
        assert!(geom.wire_intersection(p, 10.0, p, 20.0).is_none());
    }

    #[test]
    fn test_drift_coord_scales_with_tick() {
        let geom = UniformGeometry::default();
        let p = PlaneCode::encode(0, 0, 0);
        assert_relative_eq!(geom.drift_coord(p, 100.0), 8.02, epsilon = 1e-9);
    }

    #[test]
    fn test_linear_dedx_without_lifetime() {
        let estimator = LinearDedx::default();
        let p = PlaneCode::encode(0, 0, 2);
        assert_relative_eq!(estimator.dedx(1000.0, 500.0, p), 2.4, epsilon = 1e-9);
    }
}
