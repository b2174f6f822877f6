use std::cmp::Ordering;
use std::fmt;

/// ElectionId is the 128-bit value a device uses to pick the one client allowed to program it.
/// On the wire it is split into two u64 halves; it compares and increments as a u128.
#[derive(Copy, Clone, Default, Hash, Eq, PartialEq)]
pub struct ElectionId {
    pub low: u64,
    pub high: u64,
}

impl ElectionId {
    pub const fn new(low: u64, high: u64) -> Self {
        ElectionId { low, high }
    }

    pub fn as_u128(&self) -> u128 {
        (u128::from(self.high) << 64) | u128::from(self.low)
    }

    /// The next id, carrying from `low` into `high`. None once the id space is exhausted.
    pub fn checked_next(&self) -> Option<Self> {
        let (low, carry) = self.low.overflowing_add(1);
        let high = if carry { self.high.checked_add(1)? } else { self.high };
        Some(ElectionId { low, high })
    }

    pub fn is_zero(&self) -> bool {
        self.low == 0 && self.high == 0
    }
}

impl Ord for ElectionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_u128().cmp(&other.as_u128())
    }
}

impl PartialOrd for ElectionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(low={}, high={})", self.low, self.high)
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments_low() {
        assert_eq!(ElectionId::new(1, 0).checked_next(), Some(ElectionId::new(2, 0)));
        assert_eq!(ElectionId::new(7, 3).checked_next(), Some(ElectionId::new(8, 3)));
    }

    #[test]
    fn next_carries_into_high() {
        assert_eq!(
            ElectionId::new(u64::MAX, 0).checked_next(),
            Some(ElectionId::new(0, 1))
        );
        assert_eq!(ElectionId::new(u64::MAX, u64::MAX).checked_next(), None);
    }

    #[test]
    fn ordering_is_numeric_across_halves() {
        assert!(ElectionId::new(0, 1) > ElectionId::new(u64::MAX, 0));
        assert!(ElectionId::new(2, 0) > ElectionId::new(1, 0));
        assert_eq!(ElectionId::new(5, 5).as_u128(), (5u128 << 64) | 5);
    }
}
