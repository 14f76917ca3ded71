//! Tests for status, cancel, counts, priority.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_status() {
    match parse(&["xferqctl", "status"]) {
        CliCommand::Status { verbose } => assert!(!verbose),
        _ => panic!("expected Status"),
    }
    match parse(&["xferqctl", "status", "-v"]) {
        CliCommand::Status { verbose } => assert!(verbose),
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_cancel() {
    match parse(&["xferqctl", "cancel", "c-123"]) {
        CliCommand::Cancel { id } => assert_eq!(id, "c-123"),
        _ => panic!("expected Cancel"),
    }
}

#[test]
fn cli_cancel_requires_id() {
    assert!(Cli::try_parse_from(["xferqctl", "cancel"]).is_err());
}

#[test]
fn cli_parse_counts() {
    match parse(&["xferqctl", "counts", "p-1"]) {
        CliCommand::Counts { id, migration } => {
            assert_eq!(id, "p-1");
            assert!(!migration);
        }
        _ => panic!("expected Counts"),
    }
    match parse(&["xferqctl", "counts", "p-1", "--migration"]) {
        CliCommand::Counts { migration, .. } => assert!(migration),
        _ => panic!("expected Counts"),
    }
}

#[test]
fn cli_parse_priority_accepts_negative() {
    match parse(&["xferqctl", "priority", "t-9", "-3"]) {
        CliCommand::Priority { id, priority } => {
            assert_eq!(id, "t-9");
            assert_eq!(priority, -3);
        }
        _ => panic!("expected Priority"),
    }
}

#[test]
fn cli_has_no_submission_command() {
    assert!(Cli::try_parse_from(["xferqctl", "add", "/archive/a.dat"]).is_err());
    assert!(Cli::try_parse_from(["xferqctl", "submit", "/archive/a.dat"]).is_err());
}
