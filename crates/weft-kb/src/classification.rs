//! Resource classification
//!
//! Classifications are free-form tags (`is`) plus attribute grants
//! (`gives`). The engine condenses `is` tags into a coarse
//! [`Functionality`] used by dependency layering and path selection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse role of a resource template in the graph. `Unknown` marks glue
/// (networking, IAM, configuration) that path selection may walk through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Functionality {
    #[default]
    Unknown,
    Compute,
    Cluster,
    Storage,
    Api,
    Messaging,
}

impl fmt::Display for Functionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Functionality::Unknown => "unknown",
            Functionality::Compute => "compute",
            Functionality::Cluster => "cluster",
            Functionality::Storage => "storage",
            Functionality::Api => "api",
            Functionality::Messaging => "messaging",
        };
        f.write_str(s)
    }
}

/// An attribute this template grants, optionally restricted to
/// functionalities (`*` grants to all).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gives {
    pub attribute: String,
    #[serde(default = "Gives::any_functionality")]
    pub functionality: Vec<String>,
}

impl Gives {
    fn any_functionality() -> Vec<String> {
        vec!["*".to_string()]
    }

    pub fn applies_to(&self, functionality: Functionality) -> bool {
        self.functionality
            .iter()
            .any(|f| f == "*" || f == &functionality.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub is: Vec<String>,
    #[serde(default)]
    pub gives: Vec<Gives>,
}

impl Classification {
    pub fn contains_all(&self, needs: &[String]) -> bool {
        needs.iter().all(|n| self.is.contains(n))
    }

    /// Derive the functionality from the `is` tags. Exactly one functional
    /// tag yields that functionality; zero or conflicting tags yield
    /// `Unknown`.
    pub fn functionality(&self) -> Functionality {
        let mut found = Functionality::Unknown;
        for tag in &self.is {
            let matched = match tag.as_str() {
                "compute" => Functionality::Compute,
                "cluster" => Functionality::Cluster,
                "storage" => Functionality::Storage,
                "api" => Functionality::Api,
                "messaging" => Functionality::Messaging,
                _ => continue,
            };
            if found != Functionality::Unknown && found != matched {
                return Functionality::Unknown;
            }
            found = matched;
        }
        found
    }
}
