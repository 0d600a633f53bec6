//! Exec-driver configuration: the ambient counterpart to the original's
//! CLI/AppData configuration (out of scope per §1), plus one safety knob
//! the spec doesn't itself require.

/// Knobs the exec driver consults at startup and on every macro step.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Hard ceiling on pending-queue pops within a single macro step.
    /// §4.H proves quiescence is reached in a bounded number of pops for
    /// any legal plan; this bound exists so that a plan-construction bug
    /// (e.g. an accidental cycle that slipped past the acyclicity check)
    /// produces a diagnosable `ExecError::Assertion` instead of hanging
    /// the host process.
    pub max_pops_per_cycle: u32,

    /// Relative epsilon used when a `LookupOnChange` decides whether a
    /// `Real` value has crossed its thresholds (§4.C, §9). Forwarded to
    /// `plexil_cache::cache_entry::ThresholdBand::is_exceeded`.
    pub real_epsilon: f64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        ExecConfig {
            max_pops_per_cycle: 100_000,
            real_epsilon: plexil_cache::DEFAULT_REAL_EPSILON,
        }
    }
}
