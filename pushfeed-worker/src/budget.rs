/// Calls kept in reserve below the upstream rate limit.
pub const RATE_LIMIT_THRESHOLD: i64 = 5;

/// How many secondary API calls a cycle may still make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unlimited,
    Bounded(usize),
}

impl Budget {
    /// Budget from the remaining-calls hint of the feed response. Without a hint
    /// the only bound is the per-batch cap.
    pub fn from_remaining(remaining: Option<i64>, threshold: i64) -> Self {
        match remaining {
            None => Budget::Unlimited,
            Some(remaining) => {
                let spare = remaining.saturating_sub(threshold).max(0);
                Budget::Bounded(usize::try_from(spare).unwrap_or(usize::MAX))
            }
        }
    }

    pub fn is_exhausted(self) -> bool {
        matches!(self, Budget::Bounded(0))
    }

    /// Budget left after making `calls` calls.
    pub fn spend(self, calls: usize) -> Self {
        match self {
            Budget::Unlimited => Budget::Unlimited,
            Budget::Bounded(left) => Budget::Bounded(left.saturating_sub(calls)),
        }
    }

    /// Number of fetches allowed in a batch capped at `per_batch`.
    pub fn limit(self, per_batch: usize) -> usize {
        match self {
            Budget::Unlimited => per_batch,
            Budget::Bounded(left) => left.min(per_batch),
        }
    }
}

/// Parse a rate-limit header value. Blank counts as missing, garbage as zero.
pub fn parse_header_count(value: Option<&str>) -> Option<i64> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    Some(value.parse().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_threshold_in_reserve() {
        assert_eq!(Budget::from_remaining(Some(6), 5), Budget::Bounded(1));
        assert_eq!(Budget::from_remaining(Some(5), 5), Budget::Bounded(0));
        assert_eq!(Budget::from_remaining(Some(3), 5), Budget::Bounded(0));
        assert_eq!(Budget::from_remaining(Some(-10), 5), Budget::Bounded(0));
        assert_eq!(Budget::from_remaining(None, 5), Budget::Unlimited);
    }

    #[test]
    fn spending_never_goes_negative() {
        let budget = Budget::Bounded(3);
        assert_eq!(budget.spend(2), Budget::Bounded(1));
        assert_eq!(budget.spend(10), Budget::Bounded(0));
        assert!(budget.spend(3).is_exhausted());
        assert!(!Budget::Unlimited.spend(1000).is_exhausted());
    }

    #[test]
    fn limit_respects_batch_cap() {
        assert_eq!(Budget::Unlimited.limit(50), 50);
        assert_eq!(Budget::Bounded(100).limit(50), 50);
        assert_eq!(Budget::Bounded(7).limit(50), 7);
    }

    #[test]
    fn parses_header_counts() {
        assert_eq!(parse_header_count(Some("59")), Some(59));
        assert_eq!(parse_header_count(Some(" ")), None);
        assert_eq!(parse_header_count(None), None);
        assert_eq!(parse_header_count(Some("lots")), Some(0));
    }
}
