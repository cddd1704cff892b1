//! Gate errors.

/// Errors raised while configuring or running a gate
///
/// A failing validator is not an error; it is reported in the
/// [`crate::GateResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrvError {
    /// The gate names a validator that is not registered
    #[error("Unknown validator {validator} in gate {gate}")]
    UnknownValidator {
        /// Gate name
        gate: String,
        /// Missing validator name
        validator: String,
    },

    /// The gate configuration is out of bounds
    #[error("Invalid gate {gate}: {reason}")]
    InvalidConfig {
        /// Gate name
        gate: String,
        /// What was wrong
        reason: String,
    },

    /// A validator with the same name is already registered
    #[error("Validator already registered: {name}")]
    DuplicateValidator {
        /// Conflicting name
        name: String,
    },
}
