//! Error taxonomy for the dynamics core.
//!
//! Setup-time problems (bad scale graphs, unknown frames, attach cycles) are
//! reported as [`SimError::Configuration`] and are fatal before any stepping
//! begins. Per-step problems (`Convergence`, `DisconnectedFrames`) abort the
//! offending step and are surfaced to the driver, which decides whether to
//! retry, substitute, or halt.

use thiserror::Error;

/// All failure modes of the dynamics core.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    /// Invalid or cyclic scale/frame/body relationships, detected at setup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A time-conversion table lookup fell outside the table's valid range
    /// and no override value was supplied.
    #[error("{table} lookup out of range: {value:.3} outside [{min:.3}, {max:.3}]")]
    TableRange {
        /// Which table was consulted.
        table: &'static str,
        /// The lookup key (MJD for the built-in tables).
        value: f64,
        /// Lower bound of the table.
        min: f64,
        /// Upper bound of the table.
        max: f64,
    },

    /// Two frames share no common ancestor, so no transform exists.
    #[error("frames '{from}' and '{to}' share no common ancestor")]
    DisconnectedFrames {
        /// Source frame name.
        from: String,
        /// Destination frame name.
        to: String,
    },

    /// A corrector iteration or adaptive step-size search exhausted its
    /// budget without meeting tolerance.
    #[error(
        "failed to converge after {iterations} iterations \
         (residual {residual:.3e}, tolerance {tolerance:.3e})"
    )]
    Convergence {
        /// Iterations (or step-size reductions) consumed.
        iterations: usize,
        /// Residual at the point of giving up.
        residual: f64,
        /// The tolerance that was not met.
        tolerance: f64,
    },

    /// A state value is unusable (zero-norm position, non-finite input,
    /// unsupported conic, operation in the wrong lifecycle phase).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Name lookup failed for a frame.
    #[error("unknown frame '{0}'")]
    UnknownFrame(String),

    /// Name lookup failed for a body.
    #[error("unknown body '{0}'")]
    UnknownBody(String),

    /// Name lookup failed for an integration loop.
    #[error("unknown integration loop '{0}'")]
    UnknownLoop(String),

    /// A checkpoint blob could not be decoded or does not match the model.
    #[error("checkpoint restore failed: {0}")]
    Checkpoint(String),
}

/// Convenience alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;
