//! Key generator for auto-increment stores.

use crate::error::{CoreError, CoreResult};
use crate::types::MAX_GENERATED_KEY;

/// Monotonic counter handing out numeric keys.
///
/// The counter starts at 1. Explicit numeric keys at or above the
/// current value push it to `floor(key) + 1`; keys beyond the largest
/// safe integer exhaust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyGenerator {
    current: u64,
}

impl KeyGenerator {
    /// Creates a generator whose first key is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: 1 }
    }

    /// Returns the next key that would be generated.
    #[must_use]
    pub const fn current(&self) -> u64 {
        self.current
    }

    /// Returns true once no further key can be generated.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.current > MAX_GENERATED_KEY
    }

    /// Generates a key.
    pub fn generate(&mut self) -> CoreResult<u64> {
        if self.is_exhausted() {
            return Err(CoreError::ConstraintOverflow);
        }
        let key = self.current;
        self.current += 1;
        Ok(key)
    }

    /// Accounts for an explicitly supplied numeric key.
    ///
    /// Returns true if the counter moved.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn observe(&mut self, key: f64) -> bool {
        let ceiling = (MAX_GENERATED_KEY + 1) as f64;
        let key = key.min(ceiling);
        if key < self.current as f64 {
            return false;
        }
        self.current = key.floor() as u64 + 1;
        true
    }

    /// Restores a previous counter value.
    pub(crate) fn restore(&mut self, current: u64) {
        self.current = current;
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one() {
        let mut generator = KeyGenerator::new();
        assert_eq!(generator.generate().unwrap(), 1);
        assert_eq!(generator.generate().unwrap(), 2);
    }

    #[test]
    fn explicit_keys_advance() {
        let mut generator = KeyGenerator::new();
        assert!(generator.observe(10.5));
        assert_eq!(generator.generate().unwrap(), 11);

        assert!(!generator.observe(3.0));
        assert!(!generator.observe(-100.0));
        assert_eq!(generator.generate().unwrap(), 12);
    }

    #[test]
    fn overflows_after_max() {
        let mut generator = KeyGenerator::new();
        generator.restore(MAX_GENERATED_KEY);
        assert_eq!(generator.generate().unwrap(), MAX_GENERATED_KEY);
        assert!(matches!(
            generator.generate(),
            Err(CoreError::ConstraintOverflow)
        ));
    }

    #[test]
    fn huge_keys_exhaust() {
        let mut generator = KeyGenerator::new();
        assert!(generator.observe(f64::INFINITY));
        assert!(generator.is_exhausted());
        assert!(generator.generate().is_err());
    }
}
