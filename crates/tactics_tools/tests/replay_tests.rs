//! Replay inspection and verification from files on disk.

use tactics_core::prelude::*;
use tactics_test_utils::fixtures::{self, BARRACKS, BLUE, ENGINEER, RED, RIFLE_SQUAD};
use tactics_tools::replay::{summarize_file, verify_file};
use tactics_tools::ToolError;

fn recorded_match() -> Replay {
    let mut recorder = ReplayRecorder::new("tools-test", fixtures::battlefield()).unwrap();
    assert!(recorder.issue(Command::Submit {
        owner: BLUE,
        request: PlacementRequest::unit(ENGINEER, fixtures::cell(5, 5)),
    }));
    assert!(recorder.issue(Command::Submit {
        owner: RED,
        request: PlacementRequest::unit(RIFLE_SQUAD, fixtures::cell(30, 30)),
    }));
    recorder.step();
    assert!(recorder.issue(Command::Submit {
        owner: BLUE,
        request: PlacementRequest::building(BARRACKS, fixtures::cell(10, 10)).with_builder(1),
    }));
    for _ in 0..3 {
        recorder.step();
    }
    recorder.issue(Command::BuilderArrived(1));
    recorder.step();
    recorder.finish().0
}

// ----------------------------------------------------------------------------
// Summary
// ----------------------------------------------------------------------------

#[test]
fn test_summary_counts_commands_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("match.replay");
    recorded_match().save(&path).unwrap();

    let summary = summarize_file(&path).unwrap();
    assert_eq!(summary.scenario_id, "tools-test");
    assert_eq!(summary.final_tick, 5);
    assert_eq!(summary.command_count, 4);
    assert_eq!(summary.commands_by_kind["submit"], 3);
    assert_eq!(summary.commands_by_kind["builder_arrived"], 1);
    assert!(summary.snapshot_bytes > 0);
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = summarize_file(&dir.path().join("missing.replay"));
    assert!(matches!(result, Err(ToolError::Core(GameError::Io { .. }))));
}

// ----------------------------------------------------------------------------
// Verification
// ----------------------------------------------------------------------------

#[test]
fn test_recorded_match_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("match.replay");
    let replay = recorded_match();
    let expected = replay.final_hash;
    replay.save(&path).unwrap();

    let verification = verify_file(&path).unwrap();
    assert!(verification.matches);
    assert_eq!(verification.replayed_hash, expected);
}

#[test]
fn test_tampered_hash_does_not_verify() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("match.replay");
    let mut replay = recorded_match();
    replay.final_hash ^= 1;
    replay.save(&path).unwrap();

    let verification = verify_file(&path).unwrap();
    assert!(!verification.matches);
    assert_ne!(verification.replayed_hash, verification.summary.final_hash);
}
