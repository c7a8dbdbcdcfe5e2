//! Recording and playback of battlefield command streams.
//!
//! A replay stores the battlefield snapshot it started from and every command
//! issued afterwards, tagged with the tick it was issued at. Playing the
//! commands back against the snapshot reproduces the match exactly, which is
//! how desyncs between peers are reproduced offline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::battlefield::Battlefield;
use crate::config::PeerRole;
use crate::error::{GameError, Result};
use crate::ids::{EntityId, Owner, PlacementId};
use crate::math::Vec2Fixed;
use crate::placement::{Placement, PlacementRequest};

/// Replay file format version for compatibility.
pub const REPLAY_VERSION: u32 = 1;

/// One input to a battlefield.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// [`Battlefield::submit`].
    Submit {
        /// Requesting player and team.
        owner: Owner,
        /// The request.
        request: PlacementRequest,
    },
    /// [`Battlefield::apply_remote`].
    ApplyRemote(Placement),
    /// [`Battlefield::notify_builder_arrived`].
    BuilderArrived(EntityId),
    /// [`Battlefield::request_cancel`].
    CancelBuild(EntityId),
    /// [`Battlefield::complete_construction`].
    CompleteConstruction(PlacementId),
    /// [`Battlefield::destroy_placement`].
    Destroy(PlacementId),
    /// [`Battlefield::kill_entity`].
    Kill(EntityId),
    /// [`Battlefield::move_entity`].
    Move {
        /// Entity to move.
        entity: EntityId,
        /// New position.
        position: Vec2Fixed,
    },
    /// [`Battlefield::spawn_projectile`].
    SpawnProjectile(Vec2Fixed),
}

impl Command {
    /// Apply this command. Returns whether the battlefield accepted it.
    ///
    /// Rejections are part of the match: replaying a rejected command is
    /// rejected again and leaves the state unchanged.
    pub fn apply(&self, battlefield: &mut Battlefield) -> bool {
        match self {
            Self::Submit { owner, request } => battlefield.submit(*request, *owner).is_ok(),
            Self::ApplyRemote(placement) => battlefield.apply_remote(placement).is_ok(),
            Self::BuilderArrived(builder) => {
                battlefield.notify_builder_arrived(*builder);
                true
            }
            Self::CancelBuild(builder) => {
                battlefield.request_cancel(*builder);
                true
            }
            Self::CompleteConstruction(placement_id) => {
                battlefield.complete_construction(*placement_id).is_ok()
            }
            Self::Destroy(placement_id) => battlefield.destroy_placement(*placement_id).is_ok(),
            Self::Kill(entity) => battlefield.kill_entity(*entity).is_ok(),
            Self::Move { entity, position } => {
                battlefield.move_entity(*entity, *position).is_ok()
            }
            Self::SpawnProjectile(position) => {
                battlefield.spawn_projectile(*position);
                true
            }
        }
    }

    /// Short name of the variant, for logs and summaries.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::ApplyRemote(_) => "apply_remote",
            Self::BuilderArrived(_) => "builder_arrived",
            Self::CancelBuild(_) => "cancel_build",
            Self::CompleteConstruction(_) => "complete_construction",
            Self::Destroy(_) => "destroy",
            Self::Kill(_) => "kill",
            Self::Move { .. } => "move",
            Self::SpawnProjectile(_) => "spawn_projectile",
        }
    }
}

/// A command tagged with the tick it was issued at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCommand {
    /// Battlefield tick when the command was issued.
    pub tick: u64,
    /// The command.
    pub command: Command,
}

impl ReplayCommand {
    /// Create a new replay command record.
    #[must_use]
    pub const fn new(tick: u64, command: Command) -> Self {
        Self { tick, command }
    }
}

/// Complete replay data structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replay {
    /// Replay format version.
    pub version: u32,
    /// Scenario identifier or name.
    pub scenario_id: String,
    /// Snapshot of the battlefield before the first command.
    pub initial_state: Vec<u8>,
    /// Stream of commands in tick order.
    pub commands: Vec<ReplayCommand>,
    /// Tick reached when recording stopped.
    pub final_tick: u64,
    /// State hash at `final_tick`.
    pub final_hash: u64,
}

impl Replay {
    /// Start a replay from the battlefield's current state.
    pub fn new(scenario_id: impl Into<String>, initial_state: &Battlefield) -> Result<Self> {
        Ok(Self {
            version: REPLAY_VERSION,
            scenario_id: scenario_id.into(),
            initial_state: initial_state.snapshot()?,
            commands: Vec::new(),
            final_tick: initial_state.tick(),
            final_hash: initial_state.state_hash(),
        })
    }

    /// Record a command for replay.
    pub fn record_command(&mut self, tick: u64, command: Command) {
        self.commands.push(ReplayCommand::new(tick, command));
    }

    /// Finalize the replay with end-of-recording state.
    pub fn finalize(&mut self, final_tick: u64, final_hash: u64) {
        self.final_tick = final_tick;
        self.final_hash = final_hash;
    }

    /// Save the replay to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = bincode::serialize(self)
            .map_err(|e| GameError::Serialization(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path, bytes).map_err(|e| GameError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load a replay from a file, rejecting other format versions.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| GameError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let replay: Self = bincode::deserialize(&bytes)
            .map_err(|e| GameError::Serialization(format!("Failed to deserialize replay: {e}")))?;

        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {REPLAY_VERSION}, got {}",
                replay.version
            )));
        }

        Ok(replay)
    }

    /// The battlefield the replay starts from, as an authoritative peer.
    pub fn restore_initial_state(&self) -> Result<Battlefield> {
        Battlefield::restore(&self.initial_state, PeerRole::Authoritative)
    }

    /// Commands issued at `tick`, in issue order.
    #[must_use]
    pub fn commands_at_tick(&self, tick: u64) -> Vec<&ReplayCommand> {
        self.commands.iter().filter(|cmd| cmd.tick == tick).collect()
    }

    /// Total duration of the replay in ticks.
    #[must_use]
    pub const fn duration(&self) -> u64 {
        self.final_tick
    }

    /// Total number of commands in the replay.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

/// A battlefield that records every command it is given.
#[derive(Debug)]
pub struct ReplayRecorder {
    battlefield: Battlefield,
    replay: Replay,
}

impl ReplayRecorder {
    /// Start recording from the battlefield's current state.
    pub fn new(scenario_id: impl Into<String>, battlefield: Battlefield) -> Result<Self> {
        let replay = Replay::new(scenario_id, &battlefield)?;
        Ok(Self {
            battlefield,
            replay,
        })
    }

    /// Apply and record a command at the current tick.
    pub fn issue(&mut self, command: Command) -> bool {
        let accepted = command.apply(&mut self.battlefield);
        self.replay
            .record_command(self.battlefield.tick(), command);
        accepted
    }

    /// Advance the battlefield by one step.
    pub fn step(&mut self) -> crate::battlefield::StepReport {
        self.battlefield.step()
    }

    /// The battlefield being recorded.
    #[must_use]
    pub const fn battlefield(&self) -> &Battlefield {
        &self.battlefield
    }

    /// Stop recording and return the finalized replay with the battlefield.
    pub fn finish(self) -> (Replay, Battlefield) {
        let Self {
            battlefield,
            mut replay,
        } = self;
        replay.finalize(battlefield.tick(), battlefield.state_hash());
        (replay, battlefield)
    }
}

/// Replay playback controller.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    battlefield: Battlefield,
    /// Index into the command stream.
    command_index: usize,
}

impl ReplayPlayer {
    /// Create a player positioned at the start of the replay.
    pub fn new(replay: Replay) -> Result<Self> {
        let battlefield = replay.restore_initial_state()?;
        Ok(Self {
            replay,
            battlefield,
            command_index: 0,
        })
    }

    /// Apply the commands of the current tick that have not run yet.
    fn apply_pending(&mut self) {
        let tick = self.battlefield.tick();
        while let Some(cmd) = self.replay.commands.get(self.command_index) {
            if cmd.tick > tick {
                break;
            }
            cmd.command.apply(&mut self.battlefield);
            self.command_index += 1;
        }
    }

    /// Advance the replay by one tick.
    ///
    /// Returns true if there are more ticks to play.
    pub fn advance(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.apply_pending();
        self.battlefield.step();
        !self.is_finished()
    }

    /// Seek to a specific tick, replaying from the start.
    pub fn seek(&mut self, target_tick: u64) -> Result<()> {
        self.battlefield = self.replay.restore_initial_state()?;
        self.command_index = 0;

        let target = target_tick.min(self.replay.final_tick);
        while self.battlefield.tick() < target {
            self.apply_pending();
            self.battlefield.step();
        }
        Ok(())
    }

    /// Current tick.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.battlefield.tick()
    }

    /// Battlefield at the current tick.
    #[must_use]
    pub const fn battlefield(&self) -> &Battlefield {
        &self.battlefield
    }

    /// The replay being played.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Whether playback has reached the final tick.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.battlefield.tick() >= self.replay.final_tick
    }

    /// Play to the end and compare against the recorded final hash.
    ///
    /// Commands recorded at the final tick, after the last step, are applied
    /// before hashing.
    pub fn verify(&mut self) -> Result<bool> {
        self.seek(self.replay.final_tick)?;
        self.apply_pending();
        Ok(self.battlefield.state_hash() == self.replay.final_hash)
    }

    /// Like [`verify`](Self::verify), but a mismatch is an error.
    pub fn verify_strict(&mut self) -> Result<()> {
        if self.verify()? {
            return Ok(());
        }
        Err(GameError::DesyncDetected {
            tick: self.replay.final_tick,
            local_hash: self.battlefield.state_hash(),
            remote_hash: self.replay.final_hash,
        })
    }

    /// Progress as a percentage (0-100).
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.replay.final_tick == 0 {
            100.0
        } else {
            (self.current_tick() as f64 / self.replay.final_tick as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Cost, Descriptor, UnitDescriptor, UnitTypeId};
    use crate::config::{BattlefieldConfig, PlayerSetup};
    use crate::coords::{Footprint, GridCell};
    use crate::ids::{PlayerId, TeamId};

    const SOLDIER: UnitTypeId = UnitTypeId(1);

    fn battlefield() -> Battlefield {
        let mut catalog = Catalog::new();
        catalog.insert(Descriptor::Unit(UnitDescriptor {
            type_id: SOLDIER,
            name: "Soldier".to_string(),
            cost: Cost::new(100, 1),
            footprint: Footprint::default(),
            squad_size: 2,
            can_build: false,
        }));
        let config = BattlefieldConfig {
            grid_width: 16,
            grid_depth: 16,
            players: vec![PlayerSetup { player: 1, team: 0 }],
            ..Default::default()
        };
        Battlefield::new(config, catalog).unwrap()
    }

    fn owner() -> Owner {
        Owner::new(PlayerId(1), TeamId(0))
    }

    fn submit(x: i32, z: i32) -> Command {
        Command::Submit {
            owner: owner(),
            request: PlacementRequest::unit(SOLDIER, GridCell::new(x, z)),
        }
    }

    fn recorded_match() -> (Replay, Battlefield) {
        let mut recorder = ReplayRecorder::new("skirmish", battlefield()).unwrap();
        assert!(recorder.issue(submit(4, 4)));
        recorder.step();
        // Same cells again: rejected, and rejected again on playback
        assert!(!recorder.issue(submit(4, 4)));
        recorder.step();
        assert!(recorder.issue(Command::Move {
            entity: 1,
            position: Vec2Fixed::from_ints(10, 10),
        }));
        recorder.step();
        assert!(recorder.issue(Command::Kill(2)));
        recorder.finish()
    }

    #[test]
    fn test_recorder_tags_commands_with_ticks() {
        let (replay, battlefield) = recorded_match();
        assert_eq!(replay.version, REPLAY_VERSION);
        assert_eq!(replay.command_count(), 4);
        assert_eq!(replay.commands_at_tick(1).len(), 1);
        assert_eq!(replay.commands_at_tick(3).len(), 1);
        assert_eq!(replay.duration(), 3);
        assert_eq!(replay.final_hash, battlefield.state_hash());
    }

    #[test]
    fn test_playback_reproduces_final_state() {
        let (replay, battlefield) = recorded_match();
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(player.verify().unwrap());
        assert_eq!(player.battlefield().state_hash(), battlefield.state_hash());
        player.verify_strict().unwrap();
    }

    #[test]
    fn test_advance_and_seek() {
        let (replay, _) = recorded_match();
        let mut player = ReplayPlayer::new(replay).unwrap();

        assert_eq!(player.current_tick(), 0);
        assert!(player.advance());
        assert_eq!(player.current_tick(), 1);
        assert_eq!(player.battlefield().registry().len(), 1);

        player.seek(3).unwrap();
        assert!(player.is_finished());
        assert!(!player.advance());
        assert!((player.progress_percent() - 100.0).abs() < f64::EPSILON);

        player.seek(0).unwrap();
        assert_eq!(player.battlefield().registry().len(), 0);
    }

    #[test]
    fn test_tampered_replay_is_a_desync() {
        let (mut replay, _) = recorded_match();
        replay.commands.retain(|cmd| !matches!(cmd.command, Command::Kill(_)));

        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(!player.verify().unwrap());
        assert!(matches!(
            player.verify_strict(),
            Err(GameError::DesyncDetected { tick: 3, .. })
        ));
    }

    #[test]
    fn test_save_load() {
        let (replay, _) = recorded_match();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skirmish.replay");

        replay.save(&path).unwrap();
        let loaded = Replay::load(&path).unwrap();
        assert_eq!(loaded.scenario_id, "skirmish");
        assert_eq!(loaded.commands, replay.commands);
        assert_eq!(loaded.final_hash, replay.final_hash);
    }

    #[test]
    fn test_load_rejects_other_versions() {
        let (mut replay, _) = recorded_match();
        replay.version = REPLAY_VERSION + 1;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.replay");
        replay.save(&path).unwrap();

        assert!(matches!(
            Replay::load(&path),
            Err(GameError::InvalidState(_))
        ));
        assert!(matches!(
            Replay::load(dir.path().join("missing.replay")),
            Err(GameError::Io { .. })
        ));
    }
}
