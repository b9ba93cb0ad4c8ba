//! Server implementation.
//!
//! The authoritative host: owns the data service, seeds the world, and on
//! every tick runs the simulation through the typed writer path so each
//! change leaves as a mask update on the dispatcher.
//!
//! Determinism notes:
//! - Simulation runs in a fixed timestep.
//! - The wander RNG is seeded, so a given seed and tick count produce the
//!   same world.
//! - Entities are visited in ascending id order.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sync_shared::{
    config::SyncConfig,
    entity::SyncEntity,
    math::Vec3,
    message::UpdateMessage,
    model::{self, Avatar, Lot},
    notify::ChangeNotifier,
    registry::TypeTag,
    security::SecurityContext,
    service::DataService,
    store::EntityId,
};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info};

use crate::dispatcher::{ClientId, DispatchError, InboundOutcome, TopicDispatcher};

/// Largest per-tick step of a wandering avatar, in world units.
const WANDER_STEP: f32 = 0.5;

/// Avatars never wander farther than this from the map origin.
const WORLD_RADIUS: f32 = 500.0;

/// Sync host.
pub struct SyncServer {
    pub cfg: SyncConfig,
    dispatcher: TopicDispatcher,
    rng: StdRng,
    tick: u32,
}

impl SyncServer {
    /// Creates a server with the built-in registry and an empty world.
    pub fn new(cfg: SyncConfig, seed: u64) -> anyhow::Result<Self> {
        let registry = model::bootstrap_registry().context("build field mask registry")?;
        let service = DataService::new(Arc::new(registry), ChangeNotifier::new(cfg.notify_capacity));
        let dispatcher = TopicDispatcher::new(service, cfg.subscriber_capacity, cfg.max_auth_violations);
        Ok(Self {
            cfg,
            dispatcher,
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
        })
    }

    pub fn service(&self) -> &DataService {
        self.dispatcher.service()
    }

    pub fn dispatcher(&mut self) -> &mut TopicDispatcher {
        &mut self.dispatcher
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Seeds `cfg.demo_avatars` avatars, each owning a lot with the same id.
    pub fn seed_demo(&mut self) -> anyhow::Result<()> {
        let service = self.dispatcher.service();
        for n in 1..=self.cfg.demo_avatars {
            let id = EntityId(n);
            let mut avatar = Avatar::new(id, format!("Sim {n}"));
            avatar.budget = 1000;
            avatar.current_lot = n;
            avatar.position = Vec3::new(n as f32 * 10.0, 0.0, 0.0);
            service
                .insert(avatar)
                .with_context(|| format!("seed avatar {n}"))?;

            let mut lot = Lot::spawn(id);
            lot.name = format!("Lot {n}");
            lot.owner = n;
            lot.location = n * 100;
            lot.is_open = n % 2 == 0;
            service.insert(lot).with_context(|| format!("seed lot {n}"))?;
        }
        info!(avatars = self.cfg.demo_avatars, "Demo world seeded");
        Ok(())
    }

    /// Registers a connection.
    pub fn connect(&mut self, ctx: Arc<dyn SecurityContext>) -> (ClientId, mpsc::Receiver<UpdateMessage>) {
        self.dispatcher.connect(ctx)
    }

    pub async fn subscribe(
        &mut self,
        client: ClientId,
        type_tag: TypeTag,
        id: EntityId,
    ) -> Result<UpdateMessage, DispatchError> {
        self.dispatcher.subscribe(client, type_tag, id).await
    }

    /// Handles a frame body received from `client`.
    pub fn receive(&mut self, client: ClientId, body: &[u8]) -> InboundOutcome {
        self.dispatcher.handle_frame(client, body)
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(1.0 / self.cfg.tick_hz.max(1) as f32);
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step()?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step and publishes what changed.
    pub fn step(&mut self) -> anyhow::Result<usize> {
        let ids = self.service().store().ids_of(Avatar::TYPE_TAG);
        let mut outbound = Vec::new();
        for id in ids {
            let delta = Vec3::new(
                self.rng.gen_range(-WANDER_STEP..=WANDER_STEP),
                0.0,
                self.rng.gen_range(-WANDER_STEP..=WANDER_STEP),
            );
            let msgs = self
                .service()
                .update::<Avatar, _>(model::AVATAR_POSITION, id, |av| {
                    let next = av.position + delta;
                    if next.len_sq() <= WORLD_RADIUS * WORLD_RADIUS {
                        av.position = next;
                    }
                })
                .with_context(|| format!("move avatar {id}"))?;
            outbound.extend(msgs);
        }

        let mut delivered = 0;
        for msg in &outbound {
            delivered += self.dispatcher.publish(msg);
        }
        debug!(tick = self.tick, messages = outbound.len(), delivered, "Tick published");
        self.tick += 1;
        Ok(delivered)
    }
}
