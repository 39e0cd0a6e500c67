//! Table creator with retry-and-repair.
//!
//! A failed CREATE is classified by matching the warehouse message against
//! an ordered pattern table. Identifier problems get a rewritten statement
//! and another attempt; everything else ends the machine. No statement text
//! is executed twice, and attempts are bounded, so the machine always stops.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ddl::repair::{force_quote_identifiers, requote_keywords};
use crate::error::{ErrorKind, WarehouseError};
use crate::naming::TargetTableName;
use crate::warehouse::Warehouse;

/// Default bound on CREATE attempts per table.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

type Repair = fn(&str) -> Option<String>;

const KEYWORD_REPAIRS: &[Repair] = &[requote_keywords, force_quote_identifiers];
const IDENTIFIER_REPAIRS: &[Repair] = &[force_quote_identifiers];

/// What a warehouse error message means for table creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    AlreadyExists,
    ReservedKeyword,
    MalformedIdentifier,
    Connectivity,
    Unrecognized,
}

/// A case-insensitive substring and the class it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub class: ErrorClass,
}

impl PatternRule {
    pub fn new(pattern: impl Into<String>, class: ErrorClass) -> Self {
        Self {
            pattern: pattern.into().to_lowercase(),
            class,
        }
    }
}

/// Ordered classification table. The first matching rule wins.
#[derive(Debug, Clone)]
pub struct ErrorPatterns {
    rules: Vec<PatternRule>,
}

impl Default for ErrorPatterns {
    fn default() -> Self {
        use ErrorClass::*;
        Self::new(vec![
            PatternRule::new("already exists", AlreadyExists),
            PatternRule::new("reserved word", ReservedKeyword),
            PatternRule::new("reserved keyword", ReservedKeyword),
            PatternRule::new("invalid identifier", MalformedIdentifier),
            PatternRule::new("syntax error", MalformedIdentifier),
            PatternRule::new("unexpected '", MalformedIdentifier),
            PatternRule::new("connection refused", Connectivity),
            PatternRule::new("authentication token has expired", Connectivity),
        ])
    }
}

impl ErrorPatterns {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| PatternRule::new(r.pattern, r.class))
            .collect();
        Self { rules }
    }

    /// Defaults preceded by `extra`, so configured rules take precedence.
    pub fn with_rules(extra: &[PatternRule]) -> Self {
        let mut rules = extra.to_vec();
        rules.extend(Self::default().rules);
        Self::new(rules)
    }

    pub fn classify(&self, message: &str) -> ErrorClass {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| message.contains(&rule.pattern))
            .map(|rule| rule.class)
            .unwrap_or(ErrorClass::Unrecognized)
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }
}

/// One executed statement and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub sql: String,
    pub error: Option<String>,
    pub class: Option<ErrorClass>,
}

/// Why the creator gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// No pattern matched; the error is reported as is.
    Unrecognized,
    /// Every applicable repair produced a statement already tried.
    RepairExhausted,
    /// The attempt bound was reached.
    AttemptsExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateResult {
    Created {
        /// The statement that succeeded (or met an existing table).
        sql: String,
        attempts: Vec<Attempt>,
        already_existed: bool,
    },
    Failed {
        kind: ErrorKind,
        cause: FailureCause,
        /// Last warehouse message, verbatim.
        reason: String,
        attempts: Vec<Attempt>,
    },
}

impl CreateResult {
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            Self::Created { attempts, .. } | Self::Failed { attempts, .. } => attempts,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

/// Runs CREATE statements through the repair machine.
pub struct TableCreator<'a, W: Warehouse> {
    warehouse: &'a W,
    patterns: &'a ErrorPatterns,
    max_attempts: usize,
}

impl<'a, W: Warehouse> TableCreator<'a, W> {
    pub fn new(warehouse: &'a W, patterns: &'a ErrorPatterns) -> Self {
        Self {
            warehouse,
            patterns,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Execute `ddl`, repairing and retrying on identifier errors.
    ///
    /// Only connectivity problems come back as `Err`; every other outcome
    /// is a [`CreateResult`].
    pub async fn create_table_with_retry(
        &self,
        ddl: &str,
        target: &TargetTableName,
    ) -> Result<CreateResult, WarehouseError> {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut tried: HashSet<String> = HashSet::new();
        let mut sql = ddl.to_string();

        loop {
            tried.insert(sql.clone());
            let err = match self.warehouse.execute(&sql).await {
                Ok(_) => {
                    attempts.push(Attempt {
                        sql: sql.clone(),
                        error: None,
                        class: None,
                    });
                    tracing::debug!(table = %target, attempts = attempts.len(), "table created");
                    return Ok(CreateResult::Created {
                        sql,
                        attempts,
                        already_existed: false,
                    });
                }
                Err(err) => err,
            };

            let class = if err.is_connectivity() {
                ErrorClass::Connectivity
            } else {
                self.patterns.classify(&err.message)
            };
            attempts.push(Attempt {
                sql: sql.clone(),
                error: Some(err.message.clone()),
                class: Some(class),
            });
            tracing::debug!(table = %target, ?class, error = %err.message, "create failed");

            let repairs = match class {
                ErrorClass::AlreadyExists => {
                    return Ok(CreateResult::Created {
                        sql,
                        attempts,
                        already_existed: true,
                    });
                }
                ErrorClass::Connectivity if err.is_connectivity() => return Err(err),
                ErrorClass::Connectivity => return Err(WarehouseError::connectivity(err.message)),
                ErrorClass::Unrecognized => {
                    return Ok(failed(FailureCause::Unrecognized, err.message, attempts));
                }
                ErrorClass::ReservedKeyword => KEYWORD_REPAIRS,
                ErrorClass::MalformedIdentifier => IDENTIFIER_REPAIRS,
            };

            if attempts.len() >= self.max_attempts {
                return Ok(failed(FailureCause::AttemptsExhausted, err.message, attempts));
            }

            let repaired = repairs
                .iter()
                .filter_map(|repair| repair(&sql))
                .find(|next| !tried.contains(next));
            match repaired {
                Some(next) => {
                    tracing::info!(table = %target, ?class, "retrying with repaired DDL");
                    sql = next;
                }
                None => return Ok(failed(FailureCause::RepairExhausted, err.message, attempts)),
            }
        }
    }
}

fn failed(cause: FailureCause, reason: String, attempts: Vec<Attempt>) -> CreateResult {
    CreateResult::Failed {
        kind: ErrorKind::CreationFailure,
        cause,
        reason,
        attempts,
    }
}
