//! Standalone demo server binary.
//!
//! Usage:
//!   cargo run -p sync_server -- [--config sync.json] [--tick-hz 10] [--seed 1] [--ticks 100]
//!
//! Seeds a small world, attaches an in-process observer to every avatar and
//! runs the fixed-timestep wander loop, logging what the observer receives.
//! `--ticks 0` (the default) runs until interrupted.

use std::{env, sync::Arc};

use anyhow::Context;
use sync_server::SyncServer;
use sync_shared::{
    config::SyncConfig, entity::SyncEntity, model::Avatar, security::SystemContext,
};
use tracing::{debug, info};

struct Args {
    cfg: SyncConfig,
    seed: u64,
    ticks: u32,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args {
        cfg: SyncConfig::default(),
        seed: 1,
        ticks: 0,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                out.cfg = SyncConfig::load_file(&args[i + 1])?;
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                out.cfg.tick_hz = args[i + 1].parse().unwrap_or(out.cfg.tick_hz);
                i += 2;
            }
            "--seed" if i + 1 < args.len() => {
                out.seed = args[i + 1].parse().context("parse --seed")?;
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                out.ticks = args[i + 1].parse().context("parse --ticks")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    info!(tick_hz = args.cfg.tick_hz, seed = args.seed, avatars = args.cfg.demo_avatars, "Starting sync server");

    let mut server = SyncServer::new(args.cfg.clone(), args.seed).context("create server")?;
    server.seed_demo()?;

    let (observer, mut rx) = server.connect(Arc::new(SystemContext));
    for id in server.service().store().ids_of(Avatar::TYPE_TAG) {
        server
            .subscribe(observer, Avatar::TYPE_TAG, id)
            .await
            .with_context(|| format!("subscribe observer to avatar {id}"))?;
    }

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            debug!(type_tag = %msg.type_tag, id = %msg.id, fields = msg.fields.len(), "Observer received update");
        }
    });

    if args.ticks > 0 {
        server.run_for_ticks(args.ticks).await?;
        info!(ticks = server.tick(), "Run complete");
        return Ok(());
    }

    let tick_interval = std::time::Duration::from_secs_f32(1.0 / args.cfg.tick_hz.max(1) as f32);
    let mut next_tick = tokio::time::Instant::now();
    loop {
        server.step()?;
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}
