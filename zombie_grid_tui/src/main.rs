use anyhow::Result;
use clap::Parser;
use rand::{SeedableRng, rngs::StdRng};
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    time::{Duration, Instant},
};
use zombie_grid_core::{
    Position,
    agent::{EpisodeReport, Hyperparameters, QLearningAgent},
    environment::{GridWorld, Layout as WorldLayout, WorldConfig},
    map::CellKind,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Side length of the square grid
    #[arg(long, default_value_t = 10)]
    grid_size: usize,
    /// Number of zombie cells
    #[arg(long, default_value_t = 8)]
    zombies: usize,
    /// Number of present cells
    #[arg(long, default_value_t = 5)]
    presents: usize,
    /// Number of obstacle cells
    #[arg(long, default_value_t = 3)]
    obstacles: usize,
    /// Training episode budget
    #[arg(long, default_value_t = 10_000)]
    episodes: usize,
    /// Seed for entity placement and exploration
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Where the entity layout is saved and loaded
    #[arg(long, value_name = "FILE", default_value = "layout.json")]
    layout: PathBuf,
    /// Where the value table is saved and loaded
    #[arg(long, value_name = "FILE", default_value = "q_table.json")]
    table: PathBuf,
    /// Ignore any saved layout and value table
    #[arg(long)]
    fresh: bool,
    /// Training episodes run between redraws
    #[arg(long, default_value_t = 50)]
    episodes_per_frame: usize,
    /// Train and evaluate without the terminal UI
    #[arg(long)]
    headless: bool,
    /// Step cap for the headless greedy evaluation. The in-core evaluation
    /// loop is unbounded; this cap is a safety net for unattended runs.
    #[arg(long, default_value_t = 500)]
    eval_step_cap: usize,
}

/// What the application is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Training,
    Evaluating,
    Done,
}

struct App {
    /// The learner, which owns the world.
    agent: QLearningAgent,
    table_path: PathBuf,
    episode_budget: usize,
    episodes_per_frame: usize,
    episodes_done: usize,
    last_report: Option<EpisodeReport>,
    eval_steps: usize,
    final_status: String,
    phase: Phase,
    /// Flag to control the main loop.
    should_quit: bool,
}

impl App {
    fn new(agent: QLearningAgent, args: &Args) -> Self {
        App {
            agent,
            table_path: args.table.clone(),
            episode_budget: args.episodes,
            episodes_per_frame: args.episodes_per_frame.max(1),
            episodes_done: 0,
            last_report: None,
            eval_steps: 0,
            final_status: String::new(),
            phase: Phase::Training,
            should_quit: false,
        }
    }

    /// Advances the application by one tick: a batch of training episodes,
    /// or a single greedy evaluation step.
    fn tick(&mut self) {
        match self.phase {
            Phase::Training => {
                let batch = self
                    .episodes_per_frame
                    .min(self.episode_budget - self.episodes_done);
                for _ in 0..batch {
                    self.last_report = Some(self.agent.train_episode());
                    self.episodes_done += 1;
                }
                if self.episodes_done >= self.episode_budget {
                    if let Err(error) = self.agent.save_table(&self.table_path) {
                        self.final_status = error.to_string();
                    }
                    self.agent.reset_world();
                    self.phase = Phase::Evaluating;
                }
            }
            Phase::Evaluating => {
                let outcome = self.agent.step_greedy();
                self.eval_steps += 1;
                if outcome.terminated {
                    self.final_status = outcome.status;
                    self.phase = Phase::Done;
                }
            }
            Phase::Done => {}
        }
    }

    /// Sets the quit flag.
    fn quit(&mut self) {
        self.should_quit = true;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = WorldConfig {
        grid_size: args.grid_size,
        num_zombies: args.zombies,
        num_presents: args.presents,
        num_obstacles: args.obstacles,
    };
    let params = Hyperparameters {
        total_episodes: args.episodes,
        ..Hyperparameters::default()
    };

    let saved_layout = if args.fresh {
        None
    } else {
        WorldLayout::load(&args.layout)
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let world = GridWorld::new(&config, saved_layout, &mut rng)?;
    // The saved file may have been rejected (corrupt, or no longer valid
    // for these counts); make sure it describes the world actually in use.
    world.persist_layout(&args.layout)?;

    let mut agent = QLearningAgent::new(world, params, args.seed);
    if !args.fresh {
        agent.load_table(&args.table);
    }

    if args.headless {
        return run_headless(agent, &args);
    }

    let mut terminal = setup_terminal()?;
    let mut app = App::new(agent, &args);
    let result = run_app(&mut terminal, &mut app);
    restore_terminal(&mut terminal)?;
    result
}

/// Trains, saves the table, and runs one capped greedy evaluation without
/// touching the terminal.
fn run_headless(mut agent: QLearningAgent, args: &Args) -> Result<()> {
    println!(
        "Training for {} episodes on a {n}x{n} grid...",
        args.episodes,
        n = args.grid_size
    );
    agent.train();
    agent.save_table(&args.table)?;

    agent.reset_world();
    let mut steps = 0;
    loop {
        let outcome = agent.step_greedy();
        steps += 1;
        if outcome.terminated {
            println!(
                "Evaluation: {} in {} steps, {} of {} presents collected",
                outcome.status,
                steps,
                outcome.collected.len(),
                agent.world().presents().len()
            );
            break;
        }
        if steps >= args.eval_step_cap {
            println!(
                "Evaluation: no terminal cell reached within {} steps (policy may cycle)",
                args.eval_step_cap
            );
            break;
        }
    }
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        // Evaluation is animated slowly enough to follow; training runs as
        // fast as the redraw allows.
        let tick_rate = match app.phase {
            Phase::Evaluating => Duration::from_millis(250),
            _ => Duration::from_millis(25),
        };
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.quit(),
                    _ => {}
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Area for the grid
            Constraint::Length(6), // Area for stats
            Constraint::Length(2), // Area for status/help
        ])
        .split(frame.area());

    render_grid(frame, main_layout[0], app.agent.world());
    render_stats(frame, main_layout[1], app);

    let help_text = Paragraph::new("Press 'q' or 'Esc' to quit.")
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

/// Renders the training/evaluation statistics pane.
fn render_stats(frame: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![
        Line::from(format!(
            "Phase: {:?}   Episodes: {}/{}   ε = {:.3}",
            app.phase,
            app.episodes_done,
            app.episode_budget,
            app.agent.exploration_rate()
        )),
        Line::from(format!(
            "Presents collected: {}/{}",
            app.agent.world().collected_ordered().len(),
            app.agent.world().presents().len()
        )),
    ];
    if let Some(report) = &app.last_report {
        lines.push(Line::from(format!(
            "Last episode: {} steps, reward {:.1}{}",
            report.steps,
            report.total_reward,
            if report.status.is_empty() {
                String::new()
            } else {
                format!(", {}", report.status)
            }
        )));
    }
    if app.phase != Phase::Training {
        lines.push(Line::from(format!(
            "Greedy run: {} steps{}",
            app.eval_steps,
            if app.final_status.is_empty() {
                String::new()
            } else {
                format!(", {}", app.final_status)
            }
        )));
    }

    let stats_widget =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Stats"));
    frame.render_widget(stats_widget, area);
}

/// Renders the grid onto the frame.
fn render_grid(frame: &mut Frame, area: Rect, world: &GridWorld) {
    let occupancy = world.occupancy();
    let agent_position = world.current_position();
    let goal = world.goal();

    let mut lines: Vec<Line> = Vec::with_capacity(world.grid_size());

    for row in 0..world.grid_size() {
        let mut spans: Vec<Span> = Vec::with_capacity(world.grid_size());
        for col in 0..world.grid_size() {
            let position = Position::new(row, col);
            let span = if position == agent_position {
                Span::styled("@", Style::default().fg(Color::Red).bold())
            } else if position == goal {
                Span::styled("G", Style::default().fg(Color::Green).bold())
            } else {
                match occupancy[position] {
                    CellKind::Zombie => Span::styled("z", Style::default().fg(Color::Magenta)),
                    CellKind::Present if !world.is_collected(position) => {
                        Span::styled("p", Style::default().fg(Color::Yellow))
                    }
                    CellKind::Obstacle => Span::styled("#", Style::default().fg(Color::DarkGray)),
                    _ => Span::styled(".", Style::default().fg(Color::DarkGray)),
                }
            };
            spans.push(span);
            spans.push(Span::raw(" "));
        }
        lines.push(Line::from(spans));
    }

    let grid_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Zombie Grid").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(grid_paragraph, area);
}
