//! Replay inspection.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tactics_core::replay::{Replay, ReplayPlayer};

use crate::Result;

/// What a replay file contains, without playing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Scenario identifier.
    pub scenario_id: String,
    /// Format version.
    pub version: u32,
    /// Tick recording stopped at.
    pub final_tick: u64,
    /// Recorded state hash at `final_tick`.
    pub final_hash: u64,
    /// Snapshot size in bytes.
    pub snapshot_bytes: usize,
    /// Total commands.
    pub command_count: usize,
    /// Commands per variant name.
    pub commands_by_kind: BTreeMap<String, usize>,
}

impl ReplaySummary {
    /// Summarize a loaded replay.
    #[must_use]
    pub fn of(replay: &Replay) -> Self {
        let mut commands_by_kind = BTreeMap::new();
        for cmd in &replay.commands {
            *commands_by_kind
                .entry(cmd.command.kind().to_string())
                .or_insert(0) += 1;
        }
        Self {
            scenario_id: replay.scenario_id.clone(),
            version: replay.version,
            final_tick: replay.final_tick,
            final_hash: replay.final_hash,
            snapshot_bytes: replay.initial_state.len(),
            command_count: replay.command_count(),
            commands_by_kind,
        }
    }
}

/// Result of playing a replay to the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    /// The replay that was played.
    pub summary: ReplaySummary,
    /// State hash reached by playback.
    pub replayed_hash: u64,
    /// Whether playback reproduced the recorded hash.
    pub matches: bool,
}

/// Load and summarize a replay file.
pub fn summarize_file(path: &Path) -> Result<ReplaySummary> {
    let replay = Replay::load(path)?;
    Ok(ReplaySummary::of(&replay))
}

/// Load a replay file and play it back against its recorded hash.
pub fn verify_file(path: &Path) -> Result<Verification> {
    let replay = Replay::load(path)?;
    let summary = ReplaySummary::of(&replay);
    let mut player = ReplayPlayer::new(replay)?;
    let matches = player.verify()?;
    let replayed_hash = player.battlefield().state_hash();

    if matches {
        tracing::info!(
            scenario = %summary.scenario_id,
            ticks = summary.final_tick,
            hash = replayed_hash,
            "Replay reproduced"
        );
    } else {
        tracing::warn!(
            scenario = %summary.scenario_id,
            expected = summary.final_hash,
            actual = replayed_hash,
            "Replay diverged"
        );
    }

    Ok(Verification {
        summary,
        replayed_hash,
        matches,
    })
}
