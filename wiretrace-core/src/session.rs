//! Per-run reconstruction context.
//!
//! Everything the algorithms share (geometry, calorimetry, the
//! validated configuration and the global ID allocator) travels in
//! one session object passed by reference. There are no ambient
//! globals; a new invocation builds a new session.

use crate::config::RecoConfig;
use crate::error::ConfigError;
use crate::geometry::{DedxEstimator, Geometry};
use crate::ids::IdAllocator;

/// Run/event identification from the host framework.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventId {
    /// Run number.
    pub run: u32,
    /// Sub-run number.
    pub sub_run: u32,
    /// Event number.
    pub event: u32,
}

/// Shared per-run state. Lives for exactly one reconstruction
/// invocation.
pub struct RecoSession<'a> {
    /// Event identification.
    pub event: EventId,
    /// Geometry service.
    pub geometry: &'a dyn Geometry,
    /// dE/dx estimation service.
    pub dedx: &'a dyn DedxEstimator,
    /// Validated cut configuration.
    pub config: RecoConfig,
    /// Global unique-ID counters shared by all slice workers.
    pub ids: IdAllocator,
}

impl<'a> RecoSession<'a> {
    /// Builds a session, validating the configuration up front.
    /// A malformed configuration aborts the run before any slice is
    /// touched.
    ///
    /// # Errors
    /// The [`ConfigError`] reported by [`RecoConfig::validate`].
    pub fn new(
        event: EventId,
        geometry: &'a dyn Geometry,
        dedx: &'a dyn DedxEstimator,
        config: RecoConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            event,
            geometry,
            dedx,
            config,
            ids: IdAllocator::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{LinearDedx, UniformGeometry};

    #[test]
    fn test_session_rejects_bad_config() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let mut config = RecoConfig::default();
        config.max_angle_code.pop();
        let result = RecoSession::new(EventId::default(), &geom, &dedx, config);
        assert!(result.is_err());
    }

    #[test]
    fn test_session_construction() {
        let geom = UniformGeometry::default();
        let dedx = LinearDedx::default();
        let session = RecoSession::new(
            EventId {
                run: 1,
                sub_run: 0,
                event: 42,
            },
            &geom,
            &dedx,
            RecoConfig::default(),
        )
        .unwrap();
        assert_eq!(session.event.event, 42);
        assert_eq!(session.ids.next_traj(), 1);
    }
}
