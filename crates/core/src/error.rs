// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational error taxonomy.
//!
//! Module-level errors stay as their own `thiserror` enums; this
//! classification is what crosses process boundaries — job failure
//! messages, operator logs, and the admin surface.

use serde::{Deserialize, Serialize};

/// Kind of operational failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    MessageParsing,
    MessageValidation,
    Database,
    JobProcessing,
    Authentication,
    RateLimiting,
    Network,
    Timeout,
    Resource,
    Configuration,
    Internal,
}

crate::simple_display! {
    ErrorKind {
        Connection => "connection",
        MessageParsing => "message_parsing",
        MessageValidation => "message_validation",
        Database => "database",
        JobProcessing => "job_processing",
        Authentication => "authentication",
        RateLimiting => "rate_limiting",
        Network => "network",
        Timeout => "timeout",
        Resource => "resource",
        Configuration => "configuration",
        Internal => "internal",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

crate::simple_display! {
    Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

impl ErrorKind {
    /// Default severity when the caller doesn't have a better signal.
    ///
    /// Frame noise and rate limits are routine; configuration and
    /// internal faults need an operator.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorKind::MessageParsing | ErrorKind::RateLimiting => Severity::Low,
            ErrorKind::Connection
            | ErrorKind::MessageValidation
            | ErrorKind::Network
            | ErrorKind::Timeout => Severity::Medium,
            ErrorKind::Database
            | ErrorKind::JobProcessing
            | ErrorKind::Authentication
            | ErrorKind::Resource => Severity::High,
            ErrorKind::Configuration | ErrorKind::Internal => Severity::Critical,
        }
    }
}
