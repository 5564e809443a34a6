use thiserror::Error;

/// Attempt bounds that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttemptInfoError {
    #[error("attempt number must be at least 1 (got {attempt_number})")]
    AttemptNumberTooLow { attempt_number: u32 },

    #[error("attempt number {attempt_number} exceeds max attempts {max_attempts}")]
    AttemptNumberExceedsMax { attempt_number: u32, max_attempts: u32 },
}

/// Which try of a request is being sent, out of how many allowed.
///
/// Handed to the transport so it can vary per-attempt behavior such as
/// timeouts. Always satisfies `1 <= attempt_number <= max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestAttemptInfo {
    attempt_number: u32,
    max_attempts: u32,
}

impl RequestAttemptInfo {
    pub fn new(attempt_number: u32, max_attempts: u32) -> Result<Self, AttemptInfoError> {
        if attempt_number < 1 {
            return Err(AttemptInfoError::AttemptNumberTooLow { attempt_number });
        }
        if attempt_number > max_attempts {
            return Err(AttemptInfoError::AttemptNumberExceedsMax {
                attempt_number,
                max_attempts,
            });
        }
        Ok(Self {
            attempt_number,
            max_attempts,
        })
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt_number
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_first_attempt(&self) -> bool {
        self.attempt_number == 1
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt_number == self.max_attempts
    }
}
