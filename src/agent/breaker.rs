//! Per-session LLM call budget.

/// Returned when the budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker tripped after {max} LLM calls")]
pub struct BreakerTripped {
    pub max: u32,
}

/// Hard upper bound on LLM calls for one conversation loop.
///
/// `count` never decreases and never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreaker {
    count: u32,
    max: u32,
}

impl CircuitBreaker {
    pub fn new(max: u32) -> Self {
        Self { count: 0, max }
    }

    /// Reserve one call. Must be invoked before the call is issued.
    pub fn try_acquire(&mut self) -> Result<(), BreakerTripped> {
        if self.count >= self.max {
            return Err(BreakerTripped { max: self.max });
        }
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.count
    }

    pub fn is_tripped(&self) -> bool {
        self.count >= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_exactly_max_acquisitions() {
        let mut breaker = CircuitBreaker::new(3);
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.try_acquire(), Err(BreakerTripped { max: 3 }));
        assert_eq!(breaker.count(), 3);
    }

    #[test]
    fn failed_acquire_does_not_increment() {
        let mut breaker = CircuitBreaker::new(1);
        breaker.try_acquire().unwrap();
        let _ = breaker.try_acquire();
        let _ = breaker.try_acquire();
        assert_eq!(breaker.count(), 1);
        assert!(breaker.is_tripped());
        assert_eq!(breaker.remaining(), 0);
    }

    #[test]
    fn zero_max_trips_immediately() {
        let mut breaker = CircuitBreaker::new(0);
        assert!(breaker.is_tripped());
        assert!(breaker.try_acquire().is_err());
    }
}
