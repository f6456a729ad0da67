//! Outcome tables: the declarative mapping from how a command exited to
//! what its result means.
//!
//! An outcome table is an ordered list of rules. The first matching rule
//! wins, except that a timeout always takes priority over return-code
//! rules. The wildcard rule is mandatory and serves as the fallback.

use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use litani_core::model::{JobSpec, Outcome};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("outcome table contains no wildcard rule")]
    NoWildcard,
    #[error("unsupported outcome table format '{0}' (expected .json or .yaml)")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutcomeRule {
    ReturnCode {
        value: i32,
        action: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Timeout {
        action: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    Wildcard {
        action: Outcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub outcomes: Vec<OutcomeRule>,
}

impl OutcomeTable {
    /// Load a table from a `.json` or `.yaml` file and validate it.
    pub fn load(path: &Path) -> anyhow::Result<OutcomeTable> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading outcome table {}", path.display()))?;
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let table: OutcomeTable = match ext.as_str() {
            "json" => serde_json::from_str(&raw)?,
            "yaml" => serde_yaml::from_str(&raw)?,
            other => return Err(TableError::UnsupportedFormat(other.to_string()).into()),
        };
        table.validate()?;
        Ok(table)
    }

    /// The table used when a job does not name its own: timeout handling
    /// and extra return codes from the job's flags, then the fixed
    /// `0 => success` and `wildcard => fail` rules.
    pub fn default_for(spec: &JobSpec) -> OutcomeTable {
        let mut outcomes = Vec::new();

        if spec.timeout_ok {
            outcomes.push(OutcomeRule::Timeout {
                action: Outcome::Success,
                comment: None,
            });
        } else if spec.timeout_ignore {
            outcomes.push(OutcomeRule::Timeout {
                action: Outcome::FailIgnored,
                comment: None,
            });
        }

        for &value in spec.ok_returns.iter().flatten() {
            outcomes.push(OutcomeRule::ReturnCode {
                value,
                action: Outcome::Success,
                comment: None,
            });
        }
        for &value in spec.ignore_returns.iter().flatten() {
            outcomes.push(OutcomeRule::ReturnCode {
                value,
                action: Outcome::FailIgnored,
                comment: None,
            });
        }

        outcomes.push(OutcomeRule::ReturnCode {
            value: 0,
            action: Outcome::Success,
            comment: None,
        });
        outcomes.push(OutcomeRule::Wildcard {
            action: Outcome::Fail,
            comment: None,
        });

        OutcomeTable {
            comment: None,
            outcomes,
        }
    }

    pub fn validate(&self) -> Result<(), TableError> {
        self.wildcard().map(|_| ()).ok_or(TableError::NoWildcard)
    }

    fn wildcard(&self) -> Option<Outcome> {
        self.outcomes.iter().find_map(|rule| match rule {
            OutcomeRule::Wildcard { action, .. } => Some(*action),
            _ => None,
        })
    }

    fn timeout_action(&self) -> Option<Outcome> {
        self.outcomes.iter().find_map(|rule| match rule {
            OutcomeRule::Timeout { action, .. } => Some(*action),
            _ => None,
        })
    }

    fn return_code_action(&self, return_code: i32) -> Option<Outcome> {
        self.outcomes.iter().find_map(|rule| match rule {
            OutcomeRule::ReturnCode { value, action, .. } if *value == return_code => {
                Some(*action)
            }
            _ => None,
        })
    }

    /// Decide the outcome of a job. A reached timeout matches the timeout
    /// rule before any return-code rule is considered.
    pub fn decide(&self, return_code: i32, timeout_reached: bool) -> Result<Outcome, TableError> {
        let wildcard = self.wildcard().ok_or(TableError::NoWildcard)?;

        if timeout_reached {
            return Ok(self.timeout_action().unwrap_or(wildcard));
        }
        Ok(self.return_code_action(return_code).unwrap_or(wildcard))
    }
}

/// Resolve the table for a job: the file it names, or the synthesized
/// default. The second element is true iff the table was loaded from a
/// file, in which case the record's `loaded_outcome_dict` carries it.
pub fn table_for(spec: &JobSpec) -> anyhow::Result<(OutcomeTable, bool)> {
    match &spec.outcome_table {
        Some(path) => Ok((OutcomeTable::load(Path::new(path))?, true)),
        None => Ok((OutcomeTable::default_for(spec), false)),
    }
}
