use serde::Deserialize;

/// Which ConnectionPool implementation to build for both the master and
/// replica pools. The two are wire-compatible; this only picks the backing
/// data structure.
#[derive(Debug, Deserialize, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolVariant {
    Cas,
    Ring,
}

impl Default for PoolVariant {
    fn default() -> Self {
        PoolVariant::Cas
    }
}

impl PoolVariant {
    /// Parses a CLI pool_type argument, falling back to Cas with a warning
    /// on anything it doesn't recognize.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "ring" => PoolVariant::Ring,
            "cas" => PoolVariant::Cas,
            other => {
                tracing::warn!(value = other, "unknown pool_type, falling back to cas");
                PoolVariant::Cas
            }
        }
    }
}

impl std::fmt::Display for PoolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            PoolVariant::Cas => "cas",
            PoolVariant::Ring => "ring",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_pool_type_falls_back_to_cas() {
        assert_eq!(PoolVariant::parse("bogus"), PoolVariant::Cas);
    }

    #[test]
    fn parses_known_variants_case_insensitively() {
        assert_eq!(PoolVariant::parse("RING"), PoolVariant::Ring);
        assert_eq!(PoolVariant::parse("Cas"), PoolVariant::Cas);
    }
}
