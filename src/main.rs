//! NS-NEAT CLI - Evolve point-navigation controllers from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::time::Instant;

use ns_neat::{
    compute::{
        AgentError, FeedForwardNetwork, GenomeKey, NoveltySearchReporter, ParallelEvaluator,
        Population, SaveResultReporter, StdOutReporter,
    },
    schema::{EvaluationResult, NeatConfig},
};

/// Goal of the navigation task, behind a wall the agent has to walk around.
const GOAL: (f32, f32) = (0.0, 8.0);
const START: (f32, f32) = (0.0, 0.0);
/// Horizontal wall at `y = WALL_Y` spanning `WALL_X`.
const WALL_Y: f32 = 4.0;
const WALL_X: (f32, f32) = (-5.0, 5.0);
const ARENA: f32 = 10.0;
const STEPS: usize = 60;
const SPEED: f32 = 0.5;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [generations] [output_dir]", args[0]);
        eprintln!();
        eprintln!("Evolve controllers for a deceptive point-navigation task.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!("  generations  Number of generations (default: population.max_generations)");
        eprintln!("  output_dir   Directory for history, best genomes and checkpoints");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config = NeatConfig::from_json_file(&args[1]).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    if config.genome.num_inputs != 2 || config.genome.num_outputs != 2 {
        eprintln!(
            "The navigation task needs 2 inputs and 2 outputs (config has {} and {})",
            config.genome.num_inputs, config.genome.num_outputs
        );
        std::process::exit(1);
    }
    let generations: usize = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(config.population.max_generations);
    let output_dir = args.get(3).map(PathBuf::from);

    println!("NS-NEAT Point Navigation");
    println!("========================");
    println!("Population: {}", config.population.pop_size);
    println!("Neighbors: {}", config.novelty.neighbors);
    println!("Selection: {:?}", config.novelty.selection_score);
    println!("Generations: {}", generations);
    println!();

    let evaluator = ParallelEvaluator::new(navigate, FeedForwardNetwork::create, &config.evaluation)
        .unwrap_or_else(|e| {
            eprintln!("Error starting workers: {}", e);
            std::process::exit(1);
        });
    println!("Workers: {}", evaluator.num_workers());

    let mut population = Population::new(config).unwrap_or_else(|e| {
        eprintln!("Error creating population: {}", e);
        std::process::exit(1);
    });
    population.add_reporter(Box::new(StdOutReporter::new(false)));
    population.add_reporter(Box::new(NoveltySearchReporter::new()));
    if let Some(dir) = output_dir {
        let reporter = SaveResultReporter::new(&dir, Some(10)).unwrap_or_else(|e| {
            eprintln!("Error preparing output directory: {}", e);
            std::process::exit(1);
        });
        population.add_reporter(Box::new(reporter));
        println!("Writing results to {}", dir.display());
    }

    let start = Instant::now();
    let best = population.run(&evaluator, generations).unwrap_or_else(|e| {
        eprintln!("Run failed: {}", e);
        std::process::exit(1);
    });
    let elapsed = start.elapsed();

    let (nodes, connections) = best.genome.size();
    println!();
    println!("Best genome: {} (generation {})", best.genome.key, best.generation);
    println!("  Reward: {:.4}", best.score.reward);
    println!("  Novelty: {:.4}", best.score.novelty);
    println!("  Size: {} nodes, {} enabled connections", nodes, connections);
    println!("Archive size: {}", population.archive().len());
    if let Some(reason) = population.stop_reason() {
        println!("Stopped: {:?}", reason);
    }
    println!(
        "Time: {:.2}s ({} generations)",
        elapsed.as_secs_f32(),
        population.generation()
    );
}

/// Drive the agent toward the goal; the behavior is its final position.
fn navigate(
    _key: GenomeKey,
    net: &mut FeedForwardNetwork,
    _generation: usize,
) -> Result<EvaluationResult, AgentError> {
    let (mut x, mut y) = START;
    for _ in 0..STEPS {
        let inputs = [(GOAL.0 - x) / ARENA, (GOAL.1 - y) / ARENA];
        let out = net.activate(&inputs)?;
        let nx = (x + out[0].tanh() * SPEED).clamp(-ARENA, ARENA);
        let ny = (y + out[1].tanh() * SPEED).clamp(-ARENA, ARENA);

        let blocked = (y < WALL_Y) != (ny < WALL_Y) && (WALL_X.0..=WALL_X.1).contains(&nx);
        x = nx;
        if !blocked {
            y = ny;
        }
    }

    let distance = ((GOAL.0 - x).powi(2) + (GOAL.1 - y).powi(2)).sqrt();
    let max_distance = (2.0 * ARENA * ARENA).sqrt() * 2.0;
    let reward = 1.0 - distance / max_distance;
    Ok(EvaluationResult::new(reward, vec![x, y]))
}

fn print_example_config() {
    let mut config = NeatConfig::default();
    config.genome.num_inputs = 2;
    config.genome.num_outputs = 2;
    config.population.reward_threshold = Some(0.98);

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ns_neat::compute::{GenomeRng, InnovationTracker};
    use ns_neat::schema::GenomeConfig;

    #[test]
    fn test_navigation_stays_in_arena() {
        let config = GenomeConfig::default();
        let mut rng = GenomeRng::new(4);
        let mut tracker = InnovationTracker::new(&config);
        for key in 0..20 {
            let genome = rng.create_random(key, &config, &mut tracker);
            let mut net = FeedForwardNetwork::create(&genome, &config).unwrap();
            let result = navigate(key, &mut net, 0).unwrap();
            assert_eq!(result.behavior.len(), 2);
            assert!(result.behavior.iter().all(|v| v.abs() <= ARENA));
            assert!(result.reward > 0.0 && result.reward <= 1.0);
        }
    }
}
