//! Data directory validation against files on disk.

use std::fs;

use tactics_core::prelude::*;
use tactics_test_utils::fixtures::{self, BATTLEFIELD_RON, CATALOG_RON};
use tactics_tools::validate::{validate_data_directory, DataKind};
use tactics_tools::ToolError;
use tempfile::TempDir;

fn data_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        fs::write(dir.path().join(name), contents).unwrap();
    }
    dir
}

// ----------------------------------------------------------------------------
// Shipped data
// ----------------------------------------------------------------------------

#[test]
fn test_shipped_data_is_valid() {
    let dir = data_dir(&[("catalog.ron", CATALOG_RON), ("battlefield.ron", BATTLEFIELD_RON)]);
    let report = validate_data_directory(dir.path()).unwrap();

    assert!(report.is_ok(), "{report:?}");
    assert_eq!(report.files.len(), 2);
    // Sorted by path
    assert_eq!(report.files[0].kind, DataKind::Battlefield);
    assert_eq!(report.files[1].kind, DataKind::Catalog);
}

#[test]
fn test_non_ron_files_are_ignored() {
    let dir = data_dir(&[
        ("catalog.ron", CATALOG_RON),
        ("battlefield.ron", BATTLEFIELD_RON),
        ("README.md", "not data"),
    ]);
    let report = validate_data_directory(dir.path()).unwrap();
    assert_eq!(report.files.len(), 2);
}

// ----------------------------------------------------------------------------
// Problems
// ----------------------------------------------------------------------------

#[test]
fn test_missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = validate_data_directory(&dir.path().join("nope"));
    assert!(matches!(result, Err(ToolError::Io { .. })));
}

#[test]
fn test_missing_catalog_is_reported() {
    let dir = data_dir(&[("battlefield.ron", BATTLEFIELD_RON)]);
    let report = validate_data_directory(dir.path()).unwrap();
    assert_eq!(report.cross_file.len(), 1);
    assert!(report.cross_file[0].contains("no catalog"));
}

#[test]
fn test_broken_config_is_reported_per_file() {
    let mut config = fixtures::sample_config();
    config.grid_width = 0;
    config.players.push(config.players[0]);
    let dir = data_dir(&[
        ("catalog.ron", CATALOG_RON),
        ("battlefield.ron", fixtures::to_ron(&config).as_str()),
    ]);

    let report = validate_data_directory(dir.path()).unwrap();
    let battlefield = &report.files[0];
    assert_eq!(battlefield.kind, DataKind::Battlefield);
    assert!(battlefield.problems.len() >= 2, "{:?}", battlefield.problems);
    assert!(matches!(
        report.into_result(),
        Err(ToolError::ValidationFailed(n)) if n >= 2
    ));
}

#[test]
fn test_vein_without_matching_extractor_is_cross_checked() {
    let mut config = fixtures::sample_config();
    config.veins.push(VeinData {
        x: 30,
        z: 30,
        width: 3,
        depth: 3,
    });
    let dir = data_dir(&[
        ("catalog.ron", CATALOG_RON),
        ("skirmish.ron", fixtures::to_ron(&config).as_str()),
    ]);

    let report = validate_data_directory(dir.path()).unwrap();
    assert!(report.files.iter().all(|f| f.problems.is_empty()));
    assert_eq!(report.cross_file.len(), 1);
    assert!(report.cross_file[0].contains("3x3"));
}

#[test]
fn test_unknown_root_is_reported() {
    let dir = data_dir(&[("catalog.ron", CATALOG_RON), ("other.ron", "(foo: 1)")]);
    let report = validate_data_directory(dir.path()).unwrap();
    let other = report
        .files
        .iter()
        .find(|f| f.kind == DataKind::Unknown)
        .unwrap();
    assert_eq!(other.problems.len(), 1);
}

#[test]
fn test_report_renders_as_json() {
    let dir = data_dir(&[("catalog.ron", CATALOG_RON), ("battlefield.ron", BATTLEFIELD_RON)]);
    let json = validate_data_directory(dir.path())
        .unwrap()
        .to_json()
        .unwrap();
    assert!(json.contains("\"kind\": \"Catalog\""));
    assert!(json.contains("\"cross_file\": []"));
}
