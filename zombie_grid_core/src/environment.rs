use std::collections::HashSet;
use std::fs;
use std::path::Path;

use rand::{Rng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Action, PersistError, Position,
    map::{CellKind, Grid},
};

const STEP_COST: f64 = -0.1;
const PRESENT_REWARD: f64 = 2.0;
const GOAL_REWARD: f64 = 10.0;
const MISSED_PRESENTS_PENALTY: f64 = -1.0;
const ZOMBIE_PENALTY: f64 = -5.0;

/// Represents errors that can occur while constructing a [`GridWorld`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("grid size must be at least 2, got {0}")]
    GridTooSmall(usize),
    #[error(
        "cannot place {requested} entities on a {grid_size}x{grid_size} grid with only {available} free cells"
    )]
    NotEnoughFreeCells {
        requested: usize,
        available: usize,
        grid_size: usize,
    },
}

/// Configuration for a world, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub grid_size: usize,
    pub num_zombies: usize,
    pub num_presents: usize,
    pub num_obstacles: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig {
            grid_size: 10,
            num_zombies: 8,
            num_presents: 5,
            num_obstacles: 3,
        }
    }
}

/// The entity layout of a world, persisted so a run can be reproduced.
///
/// The order of `presents` is the declared item order used by the agent's
/// state encoding and must stay stable once saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub zombies: Vec<Position>,
    pub presents: Vec<Position>,
    pub obstacles: Vec<Position>,
}

impl Layout {
    /// Loads a layout from disk.
    ///
    /// An absent or unreadable file means "no saved layout": the caller
    /// should fall back to fresh random placement.
    pub fn load(path: &Path) -> Option<Layout> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| PersistError::Encode {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, text).map_err(|source| PersistError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Checks that this layout is usable for the given configuration:
    /// cardinalities match, all cells are in bounds, the categories are
    /// pairwise disjoint, and none of them touch the start or goal cell.
    pub fn is_valid_for(&self, config: &WorldConfig) -> bool {
        let n = config.grid_size;
        if n < 2 {
            return false;
        }
        if self.zombies.len() != config.num_zombies
            || self.presents.len() != config.num_presents
            || self.obstacles.len() != config.num_obstacles
        {
            return false;
        }
        let start = Position::new(0, 0);
        let goal = Position::new(n - 1, n - 1);
        let mut seen = HashSet::new();
        for &cell in self
            .zombies
            .iter()
            .chain(self.presents.iter())
            .chain(self.obstacles.iter())
        {
            if cell.row >= n || cell.col >= n || cell == start || cell == goal {
                return false;
            }
            if !seen.insert(cell) {
                return false;
            }
        }
        true
    }
}

/// The observation returned by one environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub position: Position,
    /// Collected presents so far, in declared order.
    pub collected: Vec<Position>,
    pub reward: f64,
    pub terminated: bool,
    /// Empty while the episode continues.
    pub status: String,
}

/// The grid-world MDP: a square grid with zombies, presents, obstacles,
/// a fixed start at (0, 0) and a fixed goal at the opposite corner.
///
/// Owns the layout and the per-episode state (current position, collected
/// presents). Knows nothing about the learner.
pub struct GridWorld {
    grid_size: usize,
    start: Position,
    goal: Position,
    zombies: HashSet<Position>,
    /// Declared present order; the agent's state encoding indexes into this.
    presents: Vec<Position>,
    obstacles: HashSet<Position>,
    occupancy: Grid<CellKind>,
    current: Position,
    collected: HashSet<Position>,
}

impl GridWorld {
    /// Creates a world from a saved layout, or places entities at random
    /// when no (valid) layout is supplied.
    ///
    /// Placement order matters: zombies first, then presents excluding
    /// zombies, then obstacles excluding both. All placement excludes the
    /// start and goal cells.
    pub fn new(
        config: &WorldConfig,
        layout: Option<Layout>,
        rng: &mut StdRng,
    ) -> Result<Self, WorldError> {
        let n = config.grid_size;
        if n < 2 {
            return Err(WorldError::GridTooSmall(n));
        }
        let requested = config.num_zombies + config.num_presents + config.num_obstacles;
        let available = n * n - 2;
        if requested > available {
            return Err(WorldError::NotEnoughFreeCells {
                requested,
                available,
                grid_size: n,
            });
        }

        let start = Position::new(0, 0);
        let goal = Position::new(n - 1, n - 1);

        let layout = match layout.filter(|l| l.is_valid_for(config)) {
            Some(layout) => layout,
            None => {
                let mut taken = HashSet::from([start, goal]);
                let zombies = place_random(config.num_zombies, n, &mut taken, rng);
                let presents = place_random(config.num_presents, n, &mut taken, rng);
                let obstacles = place_random(config.num_obstacles, n, &mut taken, rng);
                Layout {
                    zombies,
                    presents,
                    obstacles,
                }
            }
        };

        let mut occupancy = Grid::new(n);
        for &cell in &layout.zombies {
            occupancy[cell] = CellKind::Zombie;
        }
        for &cell in &layout.presents {
            occupancy[cell] = CellKind::Present;
        }
        for &cell in &layout.obstacles {
            occupancy[cell] = CellKind::Obstacle;
        }

        Ok(GridWorld {
            grid_size: n,
            start,
            goal,
            zombies: layout.zombies.into_iter().collect(),
            presents: layout.presents,
            obstacles: layout.obstacles.into_iter().collect(),
            occupancy,
            current: start,
            collected: HashSet::new(),
        })
    }

    /// Starts a new episode: the agent returns to the start cell and all
    /// presents become collectable again.
    pub fn reset_episode(&mut self) -> (Position, Vec<Position>) {
        self.current = self.start;
        self.collected.clear();
        (self.current, Vec::new())
    }

    /// Applies one action and evaluates the resulting cell.
    ///
    /// Moves that would leave the grid are absorbed at the boundary; moves
    /// into an obstacle are blocked without ending the episode.
    pub fn step(&mut self, action: Action) -> StepOutcome {
        let (dr, dc) = action.delta();
        let candidate = Position::new(
            self.current.row.saturating_add_signed(dr).min(self.grid_size - 1),
            self.current.col.saturating_add_signed(dc).min(self.grid_size - 1),
        );
        if !self.obstacles.contains(&candidate) {
            self.current = candidate;
        }
        self.evaluate_position()
    }

    /// Evaluates the current cell in fixed priority order: goal, zombie,
    /// uncollected present, plain step.
    fn evaluate_position(&mut self) -> StepOutcome {
        let mut reward = STEP_COST;
        let mut terminated = false;
        let mut status = String::new();

        if self.current == self.goal {
            terminated = true;
            if self.collected.len() == self.presents.len() {
                reward = GOAL_REWARD;
                status = "completed successfully".to_string();
            } else {
                reward = MISSED_PRESENTS_PENALTY;
                status = "left without collecting all presents".to_string();
            }
        } else if self.zombies.contains(&self.current) {
            reward = ZOMBIE_PENALTY;
            terminated = true;
            status = "encountered a zombie".to_string();
        } else if self.presents.contains(&self.current) && self.collected.insert(self.current) {
            reward = PRESENT_REWARD;
        }

        StepOutcome {
            position: self.current,
            collected: self.collected_ordered(),
            reward,
            terminated,
            status,
        }
    }

    /// Collected presents so far, in declared order.
    pub fn collected_ordered(&self) -> Vec<Position> {
        self.presents
            .iter()
            .copied()
            .filter(|p| self.collected.contains(p))
            .collect()
    }

    /// Writes this world's layout to `path` unless the file already
    /// describes it.
    ///
    /// Covers the fall-back paths too: if a saved layout was rejected as
    /// corrupt or invalid and the world was placed fresh, the stale file is
    /// replaced so it cannot outlive the world it no longer matches.
    pub fn persist_layout(&self, path: &Path) -> Result<(), PersistError> {
        let layout = self.layout();
        if Layout::load(path).as_ref() == Some(&layout) {
            return Ok(());
        }
        layout.save(path)
    }

    /// The layout of this world, for persistence.
    pub fn layout(&self) -> Layout {
        let mut zombies: Vec<Position> = self.zombies.iter().copied().collect();
        zombies.sort_by_key(|p| (p.row, p.col));
        let mut obstacles: Vec<Position> = self.obstacles.iter().copied().collect();
        obstacles.sort_by_key(|p| (p.row, p.col));
        Layout {
            zombies,
            presents: self.presents.clone(),
            obstacles,
        }
    }

    #[inline]
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn start(&self) -> Position {
        self.start
    }

    pub fn goal(&self) -> Position {
        self.goal
    }

    pub fn current_position(&self) -> Position {
        self.current
    }

    /// Present cells in declared order.
    pub fn presents(&self) -> &[Position] {
        &self.presents
    }

    pub fn is_collected(&self, position: Position) -> bool {
        self.collected.contains(&position)
    }

    /// Static occupancy map for rendering. Step logic never reads this.
    pub fn occupancy(&self) -> &Grid<CellKind> {
        &self.occupancy
    }
}

/// Draws `count` distinct random cells avoiding everything in `taken`,
/// recording the picks in `taken` so later categories avoid earlier ones.
fn place_random(
    count: usize,
    grid_size: usize,
    taken: &mut HashSet<Position>,
    rng: &mut StdRng,
) -> Vec<Position> {
    let mut placed = Vec::with_capacity(count);
    while placed.len() < count {
        let cell = Position::new(
            rng.random_range(0..grid_size),
            rng.random_range(0..grid_size),
        );
        if taken.insert(cell) {
            placed.push(cell);
        }
    }
    placed
}
