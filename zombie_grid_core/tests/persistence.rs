//! Round-trip tests for layout and value-table persistence, including the
//! fall-back behavior on missing or corrupt files.

use std::fs;
use std::path::PathBuf;

use rand::{SeedableRng, rngs::StdRng};
use zombie_grid_core::{
    Position,
    agent::{Hyperparameters, QLearningAgent, QTable},
    environment::{GridWorld, Layout, WorldConfig},
};

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("zombie_grid_persistence_tests");
    fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{}_{}.json", name, std::process::id()))
}

#[test]
fn layout_round_trips_through_disk() {
    let path = temp_path("layout_roundtrip");
    let layout = Layout {
        zombies: vec![Position::new(1, 1), Position::new(2, 3)],
        presents: vec![Position::new(0, 1)],
        obstacles: vec![Position::new(3, 0)],
    };

    layout.save(&path).unwrap();
    let loaded = Layout::load(&path).unwrap();
    assert_eq!(loaded, layout);

    fs::remove_file(&path).ok();
}

#[test]
fn missing_layout_file_yields_none() {
    let path = temp_path("layout_missing_never_created");
    fs::remove_file(&path).ok();
    assert_eq!(Layout::load(&path), None);
}

#[test]
fn corrupt_layout_file_yields_none() {
    let path = temp_path("layout_corrupt");
    fs::write(&path, "{ not json").unwrap();
    assert_eq!(Layout::load(&path), None);
    fs::remove_file(&path).ok();
}

#[test]
fn saved_layout_reproduces_the_world() {
    let path = temp_path("layout_reproduce");
    let config = WorldConfig {
        grid_size: 5,
        num_zombies: 3,
        num_presents: 2,
        num_obstacles: 1,
    };

    let mut rng = StdRng::seed_from_u64(21);
    let original = GridWorld::new(&config, None, &mut rng).unwrap();
    original.layout().save(&path).unwrap();

    // A different RNG stream must not matter once the layout is on disk.
    let mut other_rng = StdRng::seed_from_u64(9999);
    let restored = GridWorld::new(&config, Layout::load(&path), &mut other_rng).unwrap();
    assert_eq!(restored.layout(), original.layout());
    assert_eq!(restored.presents(), original.presents());

    fs::remove_file(&path).ok();
}

#[test]
fn rejected_saved_layout_is_replaced_on_persist() {
    let path = temp_path("layout_rejected");
    let config = WorldConfig {
        grid_size: 3,
        num_zombies: 1,
        num_presents: 1,
        num_obstacles: 0,
    };
    // Parses fine, but the zombie sits on the goal cell, so construction
    // must fall back to fresh placement.
    let stale = Layout {
        zombies: vec![Position::new(2, 2)],
        presents: vec![Position::new(0, 1)],
        obstacles: vec![],
    };
    stale.save(&path).unwrap();

    let mut rng = StdRng::seed_from_u64(5);
    let world = GridWorld::new(&config, Layout::load(&path), &mut rng).unwrap();
    assert_ne!(world.layout(), stale);

    // The stale file must not outlive the world it no longer describes.
    world.persist_layout(&path).unwrap();
    assert_eq!(Layout::load(&path), Some(world.layout()));

    // A second persist is a no-op: the file already matches.
    world.persist_layout(&path).unwrap();
    assert_eq!(Layout::load(&path), Some(world.layout()));

    fs::remove_file(&path).ok();
}

#[test]
fn q_table_round_trips_through_disk() {
    let path = temp_path("table_roundtrip");
    let mut table = QTable::zeroed(3, 1);
    table.set(Position::new(1, 2), 1, zombie_grid_core::Action::Left, -2.5);

    table.save(&path).unwrap();
    let loaded = QTable::load(&path).unwrap();
    assert_eq!(loaded, table);

    fs::remove_file(&path).ok();
}

#[test]
fn corrupt_table_file_falls_back_to_zeroed() {
    let path = temp_path("table_corrupt");
    fs::write(&path, "junk").unwrap();
    assert_eq!(QTable::load(&path), None);

    let config = WorldConfig {
        grid_size: 3,
        num_zombies: 0,
        num_presents: 0,
        num_obstacles: 0,
    };
    let world = GridWorld::new(&config, None, &mut StdRng::seed_from_u64(1)).unwrap();
    let mut agent = QLearningAgent::new(world, Hyperparameters::default(), 1);
    agent.load_table(&path);
    assert!(agent.table().matches(3, 0));

    fs::remove_file(&path).ok();
}

#[test]
fn agent_table_survives_a_save_and_load_cycle() {
    let path = temp_path("agent_table_cycle");
    let config = WorldConfig {
        grid_size: 4,
        num_zombies: 1,
        num_presents: 1,
        num_obstacles: 0,
    };
    let layout = Layout {
        zombies: vec![Position::new(2, 1)],
        presents: vec![Position::new(1, 3)],
        obstacles: vec![],
    };

    let mut rng = StdRng::seed_from_u64(4);
    let world = GridWorld::new(&config, Some(layout.clone()), &mut rng).unwrap();
    let params = Hyperparameters {
        total_episodes: 200,
        ..Hyperparameters::default()
    };
    let mut agent = QLearningAgent::new(world, params, 42);
    agent.train();
    agent.save_table(&path).unwrap();

    let mut rng = StdRng::seed_from_u64(4);
    let world = GridWorld::new(&config, Some(layout), &mut rng).unwrap();
    let mut restored = QLearningAgent::new(world, params, 42);
    restored.load_table(&path);
    assert_eq!(restored.table(), agent.table());

    fs::remove_file(&path).ok();
}
