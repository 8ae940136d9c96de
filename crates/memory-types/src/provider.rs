//! Embedding provider choice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Which embedding backend computes a vector.
///
/// The two variants produce vectors in different embedding spaces, so the
/// choice also namespaces cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Sentence-transformer model run in-process
    Local,
    /// Hosted embedding API
    #[default]
    Cloud,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Cloud => "cloud",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "cloud" => Ok(ProviderKind::Cloud),
            other => Err(MemoryError::InvalidInput(format!(
                "unknown embedding provider '{other}' (expected 'local' or 'cloud')"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!(" Cloud ".parse::<ProviderKind>().unwrap(), ProviderKind::Cloud);
        assert!("gemini".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_default_is_cloud() {
        assert_eq!(ProviderKind::default(), ProviderKind::Cloud);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&ProviderKind::Local).unwrap(), "\"local\"");
        let kind: ProviderKind = serde_json::from_str("\"cloud\"").unwrap();
        assert_eq!(kind, ProviderKind::Cloud);
    }
}
