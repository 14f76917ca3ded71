//! Tests for recover, expire-claims, purge-tokens.

use super::parse;
use crate::cli::{Cli, CliCommand};
use clap::Parser;

#[test]
fn cli_parse_recover() {
    match parse(&["xferqctl", "recover"]) {
        CliCommand::Recover { owners } => assert!(owners.is_empty()),
        _ => panic!("expected Recover"),
    }
}

#[test]
fn cli_parse_recover_with_owners() {
    match parse(&["xferqctl", "recover", "--owner", "node-b", "--owner", "node-c"]) {
        CliCommand::Recover { owners } => assert_eq!(owners, vec!["node-b", "node-c"]),
        _ => panic!("expected Recover"),
    }
}

#[test]
fn cli_parse_expire_claims() {
    match parse(&["xferqctl", "expire-claims"]) {
        CliCommand::ExpireClaims { older_than_secs } => assert!(older_than_secs.is_none()),
        _ => panic!("expected ExpireClaims"),
    }
    match parse(&["xferqctl", "expire-claims", "--older-than-secs", "90"]) {
        CliCommand::ExpireClaims { older_than_secs } => assert_eq!(older_than_secs, Some(90)),
        _ => panic!("expected ExpireClaims"),
    }
}

#[test]
fn cli_parse_purge_tokens() {
    match parse(&["xferqctl", "purge-tokens", "--days", "7"]) {
        CliCommand::PurgeTokens { days } => assert_eq!(days, Some(7)),
        _ => panic!("expected PurgeTokens"),
    }
}

#[test]
fn cli_rejects_bad_number() {
    assert!(Cli::try_parse_from(["xferqctl", "purge-tokens", "--days", "soon"]).is_err());
}
