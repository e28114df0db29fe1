use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Action, PersistError, Position,
    environment::{GridWorld, StepOutcome},
};

/// Learning hyperparameters, fixed at agent construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Learning rate α.
    pub learning_rate: f64,
    /// Discount factor γ.
    pub discount_factor: f64,
    /// Starting exploration rate ε.
    pub initial_exploration: f64,
    /// Floor the exploration rate never decays below.
    pub min_exploration: f64,
    /// Multiplicative decay applied once per completed episode:
    /// ε ← max(floor, ε · (1 − decay)).
    pub exploration_decay: f64,
    /// Training episode budget.
    pub total_episodes: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            learning_rate: 0.1,
            discount_factor: 0.99,
            initial_exploration: 1.0,
            min_exploration: 0.01,
            exploration_decay: 0.001,
            total_episodes: 10_000,
        }
    }
}

/// Encodes a collected subset as an index, one bit per declared present,
/// most significant bit first.
///
/// Stable for a fixed declared order, and injective over subsets:
/// `encode(∅) = 0`, `encode(all) = 2^n - 1`.
pub fn encode_collected(declared: &[Position], collected: &[Position]) -> usize {
    declared
        .iter()
        .fold(0, |acc, p| (acc << 1) | usize::from(collected.contains(p)))
}

/// Tabular state-action values stored flat, shape `[n, n, 2^p, 4]`.
///
/// Indexed by (position, collected-set code, action); dimensions are fixed
/// at construction and checked when restoring a saved table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    grid_size: usize,
    present_count: usize,
    values: Vec<f64>,
}

impl QTable {
    /// Creates a zero-initialized table for the given dimensions.
    pub fn zeroed(grid_size: usize, present_count: usize) -> Self {
        let states = 1usize << present_count;
        QTable {
            grid_size,
            present_count,
            values: vec![0.0; grid_size * grid_size * states * 4],
        }
    }

    /// Whether this table has the given dimensions.
    pub fn matches(&self, grid_size: usize, present_count: usize) -> bool {
        self.grid_size == grid_size && self.present_count == present_count
    }

    #[inline]
    fn index(&self, position: Position, code: usize, action: Action) -> usize {
        debug_assert!(position.row < self.grid_size && position.col < self.grid_size);
        debug_assert!(code < (1 << self.present_count));
        let cell = position.row * self.grid_size + position.col;
        (cell * (1 << self.present_count) + code) * 4 + action.index()
    }

    pub fn get(&self, position: Position, code: usize, action: Action) -> f64 {
        self.values[self.index(position, code, action)]
    }

    pub fn set(&mut self, position: Position, code: usize, action: Action, value: f64) {
        let index = self.index(position, code, action);
        self.values[index] = value;
    }

    /// Maximum value over all actions in a state.
    pub fn max_q(&self, position: Position, code: usize) -> f64 {
        Action::ALL
            .iter()
            .map(|&action| self.get(position, code, action))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Deterministic argmax over actions; ties go to the lowest index.
    pub fn greedy_action(&self, position: Position, code: usize) -> Action {
        let mut best = Action::Up;
        let mut best_q = self.get(position, code, best);
        for &action in &Action::ALL[1..] {
            let q = self.get(position, code, action);
            if q > best_q {
                best = action;
                best_q = q;
            }
        }
        best
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let text = serde_json::to_string(self).map_err(|source| PersistError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, text).map_err(|source| PersistError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Loads a table from disk; absent or corrupt files yield `None`.
    pub fn load(path: &Path) -> Option<QTable> {
        let text = fs::read_to_string(path).ok()?;
        let table: QTable = serde_json::from_str(&text).ok()?;
        let states = 1usize << table.present_count;
        let expected = table.grid_size * table.grid_size * states * 4;
        (table.values.len() == expected).then_some(table)
    }
}

/// Summary of one training episode.
#[derive(Debug, Clone)]
pub struct EpisodeReport {
    pub steps: usize,
    pub total_reward: f64,
    pub terminated: bool,
    /// Terminal status message, or empty if the step cap was hit.
    pub status: String,
}

/// Result of a greedy evaluation run.
#[derive(Debug, Clone)]
pub struct EvalReport {
    pub status: String,
    pub collected: Vec<Position>,
    pub steps: usize,
}

/// Off-policy tabular Q-learning agent wrapping one [`GridWorld`].
///
/// Sole mutator of its value table. The state an action is chosen in is the
/// pair (cell, collected-set code); see [`encode_collected`].
pub struct QLearningAgent {
    world: GridWorld,
    table: QTable,
    params: Hyperparameters,
    exploration_rate: f64,
    /// Per-episode step cap during training: grid_size².
    max_steps: usize,
    rng: StdRng,
}

impl QLearningAgent {
    pub fn new(world: GridWorld, params: Hyperparameters, seed: u64) -> Self {
        let table = QTable::zeroed(world.grid_size(), world.presents().len());
        let max_steps = world.grid_size() * world.grid_size();
        QLearningAgent {
            world,
            table,
            params,
            exploration_rate: params.initial_exploration,
            max_steps,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Restores a previously saved value table.
    ///
    /// A missing, corrupt, or wrong-shaped file leaves the current
    /// zero-initialized table in place; this is never an error.
    pub fn load_table(&mut self, path: &Path) {
        match QTable::load(path) {
            Some(table) if table.matches(self.world.grid_size(), self.world.presents().len()) => {
                self.table = table;
            }
            Some(_) => {
                eprintln!(
                    "Warning: saved table at {} does not fit this world; starting fresh",
                    path.display()
                );
            }
            None => {}
        }
    }

    pub fn save_table(&self, path: &Path) -> Result<(), PersistError> {
        self.table.save(path)
    }

    fn encode(&self, collected: &[Position]) -> usize {
        encode_collected(self.world.presents(), collected)
    }

    /// ε-greedy action selection over the current value estimates.
    pub fn select_action(&mut self, position: Position, collected: &[Position]) -> Action {
        if self.rng.random::<f64>() < self.exploration_rate {
            Action::ALL[self.rng.random_range(0..Action::ALL.len())]
        } else {
            self.table.greedy_action(position, self.encode(collected))
        }
    }

    /// One-step tabular Q-learning update.
    ///
    /// The next-state maximum is taken even on terminal transitions, so the
    /// destination's table row contributes its learned values; see DESIGN.md.
    fn apply_update(
        &mut self,
        position: Position,
        collected: &[Position],
        action: Action,
        reward: f64,
        next_position: Position,
        next_collected: &[Position],
    ) {
        let code = self.encode(collected);
        let next_code = self.encode(next_collected);
        let current = self.table.get(position, code, action);
        let best_next = self.table.max_q(next_position, next_code);
        let target = reward + self.params.discount_factor * best_next;
        let updated = current + self.params.learning_rate * (target - current);
        self.table.set(position, code, action, updated);
    }

    /// Runs a single training episode: reset, select/step/update until
    /// termination or the step cap, then decay the exploration rate.
    pub fn train_episode(&mut self) -> EpisodeReport {
        let (mut position, mut collected) = self.world.reset_episode();
        let mut report = EpisodeReport {
            steps: 0,
            total_reward: 0.0,
            terminated: false,
            status: String::new(),
        };

        while !report.terminated && report.steps < self.max_steps {
            let action = self.select_action(position, &collected);
            let outcome = self.world.step(action);
            self.apply_update(
                position,
                &collected,
                action,
                outcome.reward,
                outcome.position,
                &outcome.collected,
            );

            report.steps += 1;
            report.total_reward += outcome.reward;
            report.terminated = outcome.terminated;
            report.status = outcome.status;
            position = outcome.position;
            collected = outcome.collected;
        }

        self.exploration_rate = (self.exploration_rate * (1.0 - self.params.exploration_decay))
            .max(self.params.min_exploration);
        report
    }

    /// Runs the full episode budget.
    pub fn train(&mut self) {
        for _ in 0..self.params.total_episodes {
            self.train_episode();
        }
    }

    /// Takes one greedy step in the wrapped world, ignoring the exploration
    /// rate. Exposed so a front end can animate evaluation.
    pub fn step_greedy(&mut self) -> StepOutcome {
        let position = self.world.current_position();
        let collected = self.world.collected_ordered();
        let code = self.encode(&collected);
        let action = self.table.greedy_action(position, code);
        self.world.step(action)
    }

    /// Greedy evaluation run with no step cap.
    ///
    /// Relies on the learned policy to terminate: under a poor policy the
    /// greedy walk can cycle forever. Callers that cannot tolerate that must
    /// bound the run themselves via [`QLearningAgent::step_greedy`].
    pub fn evaluate(&mut self) -> EvalReport {
        self.world.reset_episode();
        let mut steps = 0;
        loop {
            let outcome = self.step_greedy();
            steps += 1;
            if outcome.terminated {
                return EvalReport {
                    status: outcome.status,
                    collected: outcome.collected,
                    steps,
                };
            }
        }
    }

    pub fn world(&self) -> &GridWorld {
        &self.world
    }

    pub fn reset_world(&mut self) {
        self.world.reset_episode();
    }

    pub fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    pub fn params(&self) -> &Hyperparameters {
        &self.params
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{Layout, WorldConfig};

    fn positions(cells: &[(usize, usize)]) -> Vec<Position> {
        cells.iter().map(|&(r, c)| Position::new(r, c)).collect()
    }

    fn test_world(config: &WorldConfig, layout: Option<Layout>) -> GridWorld {
        let mut rng = StdRng::seed_from_u64(3);
        GridWorld::new(config, layout, &mut rng).unwrap()
    }

    fn empty_config(grid_size: usize) -> WorldConfig {
        WorldConfig {
            grid_size,
            num_zombies: 0,
            num_presents: 0,
            num_obstacles: 0,
        }
    }

    #[test]
    fn encoding_of_empty_and_full_sets() {
        let declared = positions(&[(0, 1), (1, 2), (2, 0)]);
        assert_eq!(encode_collected(&declared, &[]), 0);
        assert_eq!(encode_collected(&declared, &declared), 0b111);
    }

    #[test]
    fn encoding_is_most_significant_bit_first() {
        let declared = positions(&[(0, 1), (1, 2), (2, 0)]);
        // First declared present only: highest bit.
        assert_eq!(encode_collected(&declared, &declared[..1]), 0b100);
        // Last declared present only: lowest bit.
        assert_eq!(encode_collected(&declared, &declared[2..]), 0b001);
    }

    #[test]
    fn encoding_is_injective_over_subsets() {
        let declared = positions(&[(0, 1), (1, 2), (2, 0)]);
        let mut seen = std::collections::HashSet::new();
        for mask in 0..8usize {
            let subset: Vec<Position> = declared
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, p)| *p)
                .collect();
            assert!(seen.insert(encode_collected(&declared, &subset)));
        }
    }

    #[test]
    fn zeroed_table_has_expected_shape() {
        let table = QTable::zeroed(3, 2);
        assert!(table.matches(3, 2));
        assert_eq!(table.values.len(), 3 * 3 * 4 * 4);
        assert_eq!(table.get(Position::new(2, 2), 3, Action::Right), 0.0);
    }

    #[test]
    fn greedy_action_breaks_ties_toward_lowest_index() {
        let table = QTable::zeroed(2, 0);
        assert_eq!(table.greedy_action(Position::new(0, 0), 0), Action::Up);

        let mut table = QTable::zeroed(2, 0);
        table.set(Position::new(0, 0), 0, Action::Down, 1.0);
        table.set(Position::new(0, 0), 0, Action::Right, 1.0);
        assert_eq!(table.greedy_action(Position::new(0, 0), 0), Action::Down);
    }

    #[test]
    fn update_moves_strictly_toward_the_target() {
        let layout = Layout {
            zombies: vec![],
            presents: vec![Position::new(0, 1)],
            obstacles: vec![],
        };
        let config = WorldConfig {
            grid_size: 3,
            num_zombies: 0,
            num_presents: 1,
            num_obstacles: 0,
        };
        let world = test_world(&config, Some(layout));
        let mut agent = QLearningAgent::new(world, Hyperparameters::default(), 5);

        let state = Position::new(1, 1);
        let next = Position::new(1, 2);
        agent.table.set(next, 0, Action::Down, 3.0);

        let old = agent.table.get(state, 0, Action::Right);
        agent.apply_update(state, &[], Action::Right, -0.1, next, &[]);
        let new = agent.table.get(state, 0, Action::Right);

        let target = -0.1 + agent.params.discount_factor * 3.0;
        assert!((new - target).abs() < (old - target).abs());
        // α = 0.1: exactly one tenth of the way there.
        assert!((new - 0.1 * target).abs() < 1e-12);
    }

    #[test]
    fn terminal_transitions_still_use_the_next_state_maximum() {
        // Stepping into the goal ends the episode, but the goal cell's
        // table row still contributes through the next-state maximum.
        // Deliberate reference behavior; see DESIGN.md.
        let world = test_world(&empty_config(3), None);
        let mut agent = QLearningAgent::new(world, Hyperparameters::default(), 23);

        let goal = Position::new(2, 2);
        agent.table.set(goal, 0, Action::Up, 4.0);

        let from = Position::new(1, 2);
        agent.apply_update(from, &[], Action::Down, 10.0, goal, &[]);

        let target = 10.0 + agent.params.discount_factor * 4.0;
        let expected = agent.params.learning_rate * (target - 0.0);
        assert!((agent.table.get(from, 0, Action::Down) - expected).abs() < 1e-12);
        // With a zeroed goal row the update would have landed at α·10
        // instead; the γ·4.0 term must be present.
        assert!(agent.table.get(from, 0, Action::Down) > agent.params.learning_rate * 10.0);
    }

    #[test]
    fn exploration_rate_decays_monotonically_to_the_floor() {
        let params = Hyperparameters {
            initial_exploration: 1.0,
            min_exploration: 0.4,
            exploration_decay: 0.5,
            total_episodes: 10,
            ..Hyperparameters::default()
        };
        let world = test_world(&empty_config(3), None);
        let mut agent = QLearningAgent::new(world, params, 11);

        let mut previous = agent.exploration_rate();
        for _ in 0..10 {
            agent.train_episode();
            let current = agent.exploration_rate();
            assert!(current <= previous);
            assert!(current >= params.min_exploration);
            previous = current;
        }
        assert_eq!(agent.exploration_rate(), params.min_exploration);
    }

    #[test]
    fn training_episodes_respect_the_step_cap() {
        // Wall off the goal so no episode can terminate.
        let config = WorldConfig {
            grid_size: 3,
            num_zombies: 0,
            num_presents: 0,
            num_obstacles: 2,
        };
        let layout = Layout {
            zombies: vec![],
            presents: vec![],
            obstacles: vec![Position::new(1, 2), Position::new(2, 1)],
        };
        let world = test_world(&config, Some(layout));
        let mut agent = QLearningAgent::new(world, Hyperparameters::default(), 13);

        let report = agent.train_episode();
        assert!(!report.terminated);
        assert_eq!(report.steps, 9);
        assert!(report.status.is_empty());
    }

    #[test]
    fn trained_agent_solves_an_empty_grid_greedily() {
        let params = Hyperparameters {
            total_episodes: 3000,
            ..Hyperparameters::default()
        };
        let world = test_world(&empty_config(3), None);
        let mut agent = QLearningAgent::new(world, params, 17);
        agent.train();

        let report = agent.evaluate();
        assert_eq!(report.status, "completed successfully");
        assert_eq!(report.steps, 4);
    }

    #[test]
    fn wrong_shaped_saved_table_is_ignored_on_load() {
        let dir = std::env::temp_dir().join("zombie_grid_agent_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("mismatched_table.json");

        QTable::zeroed(4, 1).save(&path).unwrap();

        let world = test_world(&empty_config(3), None);
        let mut agent = QLearningAgent::new(world, Hyperparameters::default(), 19);
        agent.load_table(&path);
        assert!(agent.table().matches(3, 0));

        std::fs::remove_file(&path).ok();
    }
}
