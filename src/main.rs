use std::time::Instant;

use crm_qlearning::corridor::{Corridor, CorridorConfig, LEFT};
use crm_qlearning::{LearnConfig, collect_counterexamples, learn, run, seeded_rng};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crm_qlearning=info,warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging()?;

    let config = LearnConfig::from_env()?;
    info!(?config, "starting corridor run");

    let mut env = Corridor::new(CorridorConfig {
        shaping: config.use_shaping,
        shaping_gamma: config.discount_factor,
        ..CorridorConfig::default()
    });
    let horizon = env.config.horizon;

    let start = Instant::now();
    let q_table = learn(&mut env, &config, None)?;
    info!(elapsed = ?start.elapsed(), states = q_table.len(), "training done");

    let mut rng = seeded_rng(config.seed);
    let episode = run(&q_table, &mut env, horizon, &mut rng)?;
    for (state, action) in &episode.trace {
        let dir = if *action == LEFT { "left" } else { "right" };
        println!("pos {:2} stage {} -> {}", state[0], state[1], dir);
    }
    println!(
        "Total reward: {:.2} in {} steps (finished: {})",
        episode.total_reward,
        episode.trace.len(),
        episode.done
    );

    let counterexamples = collect_counterexamples(&q_table, &mut env, 10, &mut rng)?;
    println!("Counterexamples: {}/10", counterexamples.len());
    Ok(())
}
