//! Fetch levels.

use std::fmt;

/// How much of an entity is known locally.
///
/// Levels are ordered: `Empty < Minimal < Metadata < Full`. A higher level
/// includes everything a lower one provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchLevel {
    /// Nothing fetched yet.
    #[default]
    Empty,
    /// Identity, thread and labels.
    Minimal,
    /// Minimal plus headers.
    Metadata,
    /// Everything, including rendered bodies and trust status.
    Full,
}

impl FetchLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 4] = [Self::Empty, Self::Minimal, Self::Metadata, Self::Full];

    /// Whether data at this level is enough for a request at `want`.
    #[must_use]
    pub fn satisfies(self, want: Self) -> bool {
        self >= want
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Minimal => "minimal",
            Self::Metadata => "metadata",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for FetchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_order() {
        assert!(FetchLevel::Empty < FetchLevel::Minimal);
        assert!(FetchLevel::Minimal < FetchLevel::Metadata);
        assert!(FetchLevel::Metadata < FetchLevel::Full);
        assert!(FetchLevel::Full.satisfies(FetchLevel::Minimal));
        assert!(!FetchLevel::Minimal.satisfies(FetchLevel::Metadata));
        assert!(FetchLevel::Empty.satisfies(FetchLevel::Empty));
    }

    fn level() -> impl Strategy<Value = FetchLevel> {
        (0..FetchLevel::ALL.len()).prop_map(|i| FetchLevel::ALL[i])
    }

    proptest! {
        #[test]
        fn satisfies_matches_rank(have in level(), want in level()) {
            let rank = |l: FetchLevel| FetchLevel::ALL.iter().position(|x| *x == l);
            prop_assert_eq!(have.satisfies(want), rank(have) >= rank(want));
        }
    }
}
