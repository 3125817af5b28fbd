//! Shared option types that replace boolean flag parameters in the Rust API.

/// Controls whether an append verifies that no element collides with an
/// entry already recorded at the target patch id.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Uniqueness {
    /// Pre-scan the stream and refuse the append on collision.
    #[default]
    Check,
    /// Trust the caller; conflicting entries are overwritten.
    Trust,
}

impl Uniqueness {
    pub fn is_checked(self) -> bool {
        matches!(self, Uniqueness::Check)
    }
}

impl From<bool> for Uniqueness {
    fn from(value: bool) -> Self {
        if value {
            Uniqueness::Check
        } else {
            Uniqueness::Trust
        }
    }
}

/// Whether local changes (transitions back to the snapshot state) are part
/// of a reconstructed patch.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum LocalChanges {
    #[default]
    Ignore,
    Include,
}

impl LocalChanges {
    pub fn included(self) -> bool {
        matches!(self, LocalChanges::Include)
    }
}

impl From<bool> for LocalChanges {
    fn from(value: bool) -> Self {
        if value {
            LocalChanges::Include
        } else {
            LocalChanges::Ignore
        }
    }
}

/// Whether a returned count is exact or an upper-bound estimate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CountKind {
    Exact,
    Estimate,
}

impl CountKind {
    pub fn is_exact(self) -> bool {
        matches!(self, CountKind::Exact)
    }
}

impl From<bool> for CountKind {
    fn from(exact: bool) -> Self {
        if exact {
            CountKind::Exact
        } else {
            CountKind::Estimate
        }
    }
}

impl std::fmt::Display for CountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CountKind::Exact => write!(f, "exact"),
            CountKind::Estimate => write!(f, "estimate"),
        }
    }
}

/// How a delta spanning several snapshots is computed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DiffStrategy {
    /// Pick iterative or direct from the estimated work.
    #[default]
    Auto,
    /// Chain the per-snapshot transition deltas.
    Iterative,
    /// Two-pointer diff of both snapshots.
    Direct,
}

impl std::str::FromStr for DiffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DiffStrategy::Auto),
            "iterative" => Ok(DiffStrategy::Iterative),
            "direct" | "snapshot" => Ok(DiffStrategy::Direct),
            other => Err(format!("unknown diff strategy '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_from_bool() {
        assert_eq!(Uniqueness::from(true), Uniqueness::Check);
        assert!(!LocalChanges::from(false).included());
        assert!(CountKind::from(true).is_exact());
        assert_eq!(CountKind::Estimate.to_string(), "estimate");
    }

    #[test]
    fn diff_strategy_parse() {
        assert_eq!("Iterative".parse::<DiffStrategy>(), Ok(DiffStrategy::Iterative));
        assert_eq!("snapshot".parse::<DiffStrategy>(), Ok(DiffStrategy::Direct));
        assert!("fast".parse::<DiffStrategy>().is_err());
    }
}
