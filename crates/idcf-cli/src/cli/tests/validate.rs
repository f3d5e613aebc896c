//! Tests for the validate subcommand.

use super::{parse, parse_err};
use crate::cli::CliCommand;
use std::path::Path;

#[test]
fn cli_parse_validate_defaults() {
    match parse(&["idcf", "validate", "--dir", "/data"]) {
        CliCommand::Validate {
            dir,
            manifest,
            check_geometry,
            output,
            jobs,
        } => {
            assert_eq!(dir, Path::new("/data"));
            assert!(manifest.is_none());
            assert!(!check_geometry);
            assert!(output.is_none());
            assert!(jobs.is_none());
        }
        _ => panic!("expected Validate"),
    }
}

#[test]
fn cli_parse_validate_full() {
    match parse(&[
        "idcf",
        "validate",
        "--dir",
        "/data",
        "--manifest",
        "m.txt",
        "--check-geometry",
        "--output",
        "report.json",
        "--jobs",
        "2",
    ]) {
        CliCommand::Validate {
            manifest,
            check_geometry,
            output,
            jobs,
            ..
        } => {
            assert_eq!(manifest.as_deref(), Some(Path::new("m.txt")));
            assert!(check_geometry);
            assert_eq!(output.as_deref(), Some(Path::new("report.json")));
            assert_eq!(jobs, Some(2));
        }
        _ => panic!("expected Validate"),
    }
}

#[test]
fn cli_validate_requires_dir() {
    parse_err(&["idcf", "validate"]);
}
