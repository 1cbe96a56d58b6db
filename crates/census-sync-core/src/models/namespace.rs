//! Data namespaces.

use serde::{Deserialize, Serialize};

/// Isolated data namespace. Demo records never share storage with production ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Real clinical data
    Production,
    /// Practice/training data
    Demo,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Production => "production",
            Namespace::Demo => "demo",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
