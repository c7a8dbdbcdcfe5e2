//! Determinism and lock-step testing utilities.
//!
//! Provides a harness for verifying that a battlefield produces identical
//! results given identical inputs, and that a replica fed the authority's
//! placements stays in step with it.
//!
//! # Testing Strategy
//!
//! Both peers of a match must be 100% deterministic. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: every position is a
//!   [`tactics_core::math::Fixed`].
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Anything whose order can leak into state (cell contents, query results,
//!   member lists) is sorted.
//!
//! - **Local id allocation on the replica**: replicas take placement ids and
//!   member entity ids from the authority verbatim.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: each module's own `#[cfg(test)]` block
//! 2. **Property tests**: random command scripts stay deterministic
//! 3. **Lock-step tests**: authority and replica hash equal after every step
//! 4. **Parallel tests**: running N battlefields on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use tactics_core::battlefield::Battlefield;
use tactics_core::config::PeerRole;
use tactics_core::replay::Command;
use tactics_core::wire;

/// Commands to issue before each step, one entry per tick.
pub type Script = Vec<Vec<Command>>;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// All unique hashes (should be 1 for a deterministic battlefield).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Battlefield is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Result of parallel battlefield runs.
#[derive(Debug, Clone)]
pub struct ParallelRunResult {
    /// Final state hash from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks each run lasted.
    pub ticks: u64,
    /// Number of runs.
    pub runs: usize,
}

impl ParallelRunResult {
    /// Check if all runs produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all runs matched.
    ///
    /// # Panics
    ///
    /// Panics if runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel battlefields diverged!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.runs,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run any state machine multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run
/// * `ticks` - Number of steps per run
/// * `setup` - Function to create the initial state
/// * `step` - Function to advance the state by one step
/// * `hash` - Function to compute the state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S, u64),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for tick in 0..ticks {
            step(&mut state, tick);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Issue one tick's commands and step.
fn play_tick(battlefield: &mut Battlefield, commands: Option<&Vec<Command>>) {
    for command in commands.into_iter().flatten() {
        command.apply(battlefield);
    }
    battlefield.step();
}

/// Play `script` against `battlefield`, returning the hash after each step.
pub fn run_script(battlefield: &mut Battlefield, script: &[Vec<Command>]) -> Vec<u64> {
    script
        .iter()
        .map(|commands| {
            play_tick(battlefield, Some(commands));
            battlefield.state_hash()
        })
        .collect()
}

/// Play `script` against `runs` fresh battlefields and compare final hashes.
///
/// # Example
///
/// ```ignore
/// use tactics_test_utils::determinism::verify_script_determinism;
/// use tactics_test_utils::fixtures;
///
/// let result = verify_script_determinism(fixtures::battlefield, &script, 3);
/// result.assert_deterministic();
/// ```
pub fn verify_script_determinism<F>(
    setup_fn: F,
    script: &[Vec<Command>],
    runs: usize,
) -> DeterminismResult
where
    F: Fn() -> Battlefield,
{
    verify_determinism(
        runs,
        script.len() as u64,
        setup_fn,
        |bf, tick| play_tick(bf, script.get(tick as usize)),
        Battlefield::state_hash,
    )
}

/// Play `script` on `runs` battlefields, each on its own scoped thread.
///
/// Catches non-determinism that only shows up under different hasher seeds
/// and memory layouts.
///
/// # Panics
///
/// Panics if a worker thread panics.
pub fn run_parallel_scripts_scoped<F>(
    setup_fn: F,
    script: &[Vec<Command>],
    runs: usize,
) -> ParallelRunResult
where
    F: Fn() -> Battlefield + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..runs)
            .map(|_| {
                s.spawn(|| {
                    let mut battlefield = setup_fn();
                    run_script(&mut battlefield, script);
                    battlefield.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ParallelRunResult {
        hashes,
        ticks: script.len() as u64,
        runs,
    }
}

/// Play half of `script`, snapshot and restore, then play the rest on both
/// the original and the restored battlefield.
///
/// Returns true when the restored battlefield matched right after restore
/// and at the end.
pub fn verify_snapshot_determinism<F>(setup_fn: F, script: &[Vec<Command>]) -> bool
where
    F: Fn() -> Battlefield,
{
    let (head, tail) = script.split_at(script.len() / 2);

    let mut original = setup_fn();
    run_script(&mut original, head);

    let Ok(bytes) = original.snapshot() else {
        return false;
    };
    let Ok(mut restored) = Battlefield::restore(&bytes, PeerRole::Authoritative) else {
        return false;
    };
    if restored.state_hash() != original.state_hash() {
        return false;
    }

    run_script(&mut original, tail) == run_script(&mut restored, tail)
}

/// An authoritative battlefield and a replica kept in lock-step.
///
/// Placements accepted by the authority travel to the replica through the
/// wire encoding; every other command is issued to both peers.
#[derive(Debug)]
pub struct LockstepPair {
    /// The peer that allocates ids.
    pub authority: Battlefield,
    /// The peer that replays the authority's placements.
    pub replica: Battlefield,
}

impl LockstepPair {
    /// Pair two battlefields.
    #[must_use]
    pub const fn new(authority: Battlefield, replica: Battlefield) -> Self {
        Self { authority, replica }
    }

    /// Issue a command. Returns whether the authority accepted it.
    pub fn issue(&mut self, command: &Command) -> bool {
        match command {
            Command::Submit { owner, request } => {
                let Ok(placement) = self.authority.submit(*request, *owner) else {
                    return false;
                };
                let decoded = wire::encode_placement(&placement)
                    .and_then(|bytes| wire::decode_placement(&bytes));
                match decoded {
                    Ok(remote) => {
                        if let Err(failure) = self.replica.apply_remote(&remote) {
                            tracing::warn!(reason = %failure, "Replica rejected placement");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Placement did not survive the wire"),
                }
                true
            }
            other => {
                let accepted = other.apply(&mut self.authority);
                other.apply(&mut self.replica);
                accepted
            }
        }
    }

    /// Step both peers.
    pub fn step(&mut self) {
        self.authority.step();
        self.replica.step();
    }

    /// Whether both peers hash equal.
    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.authority.state_hash() == self.replica.state_hash()
    }
}

/// Play `script` on a lock-step pair, finding the first tick they disagree.
///
/// # Returns
///
/// `None` if the peers stayed in sync, `Some(0)` if they disagreed before
/// the first step, `Some(tick)` if they diverged at that tick.
pub fn find_first_divergence(pair: &mut LockstepPair, script: &[Vec<Command>]) -> Option<u64> {
    if !pair.in_sync() {
        return Some(0);
    }

    for (index, commands) in script.iter().enumerate() {
        for command in commands {
            pair.issue(command);
        }
        pair.step();

        if !pair.in_sync() {
            return Some(index as u64 + 1);
        }
    }

    None
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for battlefield commands.
///
/// Entity ids are drawn from a small range so that kills, moves, and builder
/// messages hit live entities often enough to matter.
pub mod strategies {
    use proptest::prelude::*;
    use tactics_core::catalog::{Collection, UnitTypeId};
    use tactics_core::coords::GridCell;
    use tactics_core::ids::{EntityId, Owner, PlacementId, PlayerId, TeamId};
    use tactics_core::math::Vec2Fixed;
    use tactics_core::placement::PlacementRequest;
    use tactics_core::replay::Command;

    use super::Script;

    /// A cell in `0..width` × `0..depth`.
    pub fn arb_cell(width: i32, depth: i32) -> impl Strategy<Value = GridCell> {
        (0..width, 0..depth).prop_map(|(x, z)| GridCell::new(x, z))
    }

    /// A cell that may lie a little off a `width` × `depth` grid.
    pub fn arb_cell_near(width: i32, depth: i32) -> impl Strategy<Value = GridCell> {
        (-2..width + 2, -2..depth + 2).prop_map(|(x, z)| GridCell::new(x, z))
    }

    /// A world position over a `width` × `depth` grid of unit cells.
    pub fn arb_position(width: i32, depth: i32) -> impl Strategy<Value = Vec2Fixed> {
        (0..width, 0..depth).prop_map(|(x, z)| Vec2Fixed::from_ints(x, z))
    }

    /// One of the two sample players.
    pub fn arb_owner() -> impl Strategy<Value = Owner> {
        prop_oneof![
            Just(Owner::new(PlayerId(1), TeamId(0))),
            Just(Owner::new(PlayerId(2), TeamId(1))),
        ]
    }

    /// An entity id in `1..=max`.
    pub fn arb_entity(max: EntityId) -> impl Strategy<Value = EntityId> {
        1..=max
    }

    /// A unit or building request over the sample catalog's type ids,
    /// optionally with a builder.
    pub fn arb_request(width: i32, depth: i32) -> impl Strategy<Value = PlacementRequest> {
        (
            prop_oneof![Just(Collection::Unit), Just(Collection::Building)],
            1u32..=4,
            arb_cell_near(width, depth),
            proptest::option::of(arb_entity(24)),
        )
            .prop_map(|(collection, unit_type, cell, builder)| {
                let request = match collection {
                    Collection::Building => PlacementRequest::building(UnitTypeId(unit_type), cell),
                    _ => PlacementRequest::unit(UnitTypeId(unit_type), cell),
                };
                match builder {
                    Some(builder) => request.with_builder(builder),
                    None => request,
                }
            })
    }

    /// Any authoritative-side command.
    pub fn arb_command(width: i32, depth: i32) -> impl Strategy<Value = Command> {
        prop_oneof![
            4 => (arb_owner(), arb_request(width, depth))
                .prop_map(|(owner, request)| Command::Submit { owner, request }),
            2 => arb_entity(24).prop_map(Command::BuilderArrived),
            1 => arb_entity(24).prop_map(Command::CancelBuild),
            1 => (1u32..8).prop_map(|id| Command::CompleteConstruction(PlacementId(id))),
            1 => (1u32..8).prop_map(|id| Command::Destroy(PlacementId(id))),
            1 => arb_entity(24).prop_map(Command::Kill),
            2 => (arb_entity(24), arb_position(width, depth))
                .prop_map(|(entity, position)| Command::Move { entity, position }),
            1 => arb_position(width, depth).prop_map(Command::SpawnProjectile),
        ]
    }

    /// A script of up to `max_ticks` ticks with up to `max_per_tick`
    /// commands each.
    pub fn arb_script(
        width: i32,
        depth: i32,
        max_ticks: usize,
        max_per_tick: usize,
    ) -> impl Strategy<Value = Script> {
        proptest::collection::vec(
            proptest::collection::vec(arb_command(width, depth), 0..=max_per_tick),
            1..=max_ticks,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, BARRACKS, BLUE, ENGINEER, EXTRACTOR, RED, RIFLE_SQUAD};
    use proptest::prelude::*;
    use tactics_core::placement::PlacementRequest;

    fn submit(owner: tactics_core::ids::Owner, request: PlacementRequest) -> Command {
        Command::Submit { owner, request }
    }

    /// Two engineers, an extractor on the first vein, a barracks, some
    /// infantry, a move, and a kill.
    fn skirmish_script() -> Script {
        vec![
            vec![
                submit(BLUE, PlacementRequest::unit(ENGINEER, fixtures::cell(5, 5))),
                submit(RED, PlacementRequest::unit(ENGINEER, fixtures::cell(40, 40))),
            ],
            vec![
                submit(
                    BLUE,
                    PlacementRequest::building(EXTRACTOR, fixtures::vein_anchor()).with_builder(1),
                ),
                submit(
                    RED,
                    PlacementRequest::building(BARRACKS, fixtures::cell(30, 30)).with_builder(2),
                ),
            ],
            vec![Command::BuilderArrived(1), Command::BuilderArrived(2)],
            vec![
                submit(BLUE, PlacementRequest::unit(RIFLE_SQUAD, fixtures::cell(10, 10))),
                Command::CompleteConstruction(tactics_core::ids::PlacementId(3)),
            ],
            vec![Command::Move {
                entity: 5,
                position: fixtures::pos(12, 14),
            }],
            vec![Command::Kill(6)],
            vec![],
        ]
    }

    // =========================================================================
    // Basic determinism tests
    // =========================================================================

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n, _| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_empty_battlefield_determinism() {
        let idle: Script = vec![Vec::new(); 20];
        let result = verify_script_determinism(fixtures::battlefield, &idle, 3);
        result.assert_deterministic();
    }

    #[test]
    fn test_skirmish_determinism() {
        let result = verify_script_determinism(fixtures::battlefield, &skirmish_script(), 3);
        result.assert_deterministic();
        assert_eq!(result.unique_hashes().len(), 1);
    }

    #[test]
    fn test_skirmish_snapshot_determinism() {
        assert!(verify_snapshot_determinism(
            fixtures::battlefield,
            &skirmish_script()
        ));
    }

    #[test]
    fn test_parallel_skirmishes() {
        let result = run_parallel_scripts_scoped(fixtures::battlefield, &skirmish_script(), 4);
        result.assert_deterministic();
    }

    #[test]
    fn test_different_scripts_differ() {
        let mut a = fixtures::battlefield();
        let mut b = fixtures::battlefield();
        let script = skirmish_script();
        let hashes_a = run_script(&mut a, &script);
        let hashes_b = run_script(&mut b, &script[..script.len() - 2]);
        assert_ne!(hashes_a.last(), hashes_b.last());
    }

    // =========================================================================
    // Lock-step tests
    // =========================================================================

    #[test]
    fn test_skirmish_replica_stays_in_sync() {
        let mut pair = LockstepPair::new(fixtures::battlefield(), fixtures::replica());
        assert_eq!(find_first_divergence(&mut pair, &skirmish_script()), None);

        let extractor = pair.replica.placement_by_id(tactics_core::ids::PlacementId(3));
        assert!(extractor.is_some_and(|p| !p.under_construction));
    }

    #[test]
    fn test_divergence_is_located() {
        let mut pair = LockstepPair::new(fixtures::battlefield(), fixtures::replica());
        let mut script = skirmish_script();
        // Only the authority sees this one
        pair.authority
            .set_resources(fixtures::RED.player, tactics_core::economy::PlayerResources::new(0, 0));
        script.truncate(1);
        assert_eq!(find_first_divergence(&mut pair, &script), Some(0));
    }

    #[test]
    fn test_compute_hash_is_stable() {
        assert_eq!(compute_hash(&(1u32, "a")), compute_hash(&(1u32, "a")));
        assert_ne!(compute_hash(&1u32), compute_hash(&2u32));
    }

    // =========================================================================
    // Property-based tests using proptest
    // =========================================================================

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Random scripts replay to the same state.
        #[test]
        fn prop_random_scripts_are_deterministic(script in strategies::arb_script(48, 48, 12, 4)) {
            let result = verify_script_determinism(fixtures::battlefield, &script, 2);
            prop_assert!(result.is_deterministic);
        }

        /// A replica fed the authority's placements never diverges.
        #[test]
        fn prop_replica_never_diverges(script in strategies::arb_script(48, 48, 12, 4)) {
            let mut pair = LockstepPair::new(fixtures::battlefield(), fixtures::replica());
            prop_assert_eq!(find_first_divergence(&mut pair, &script), None);
        }

        /// Snapshots taken mid-script restore to an identical battlefield.
        #[test]
        fn prop_snapshots_restore_exactly(script in strategies::arb_script(48, 48, 10, 3)) {
            prop_assert!(verify_snapshot_determinism(fixtures::battlefield, &script));
        }

        /// Every step leaves the grid and index consistent with the entities.
        #[test]
        fn prop_indexes_stay_consistent(script in strategies::arb_script(48, 48, 12, 4)) {
            let mut battlefield = fixtures::battlefield();
            for commands in &script {
                for command in commands {
                    command.apply(&mut battlefield);
                }
                battlefield.step();
                prop_assert!(battlefield.verify().is_ok(), "{:?}", battlefield.verify());
            }
        }
    }
}
