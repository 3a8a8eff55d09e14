//! Storage work pushed off the simulation tick
//!
//! The tick never calls a store directly. It queues a [`StorageJob`] and a
//! single worker task runs each one on the blocking pool, so slow storage can
//! delay drops and saves but never a frame.

use crate::combat::scatter_position;
use crate::game::GameState;
use crate::persistence::{PlayerRecord, Stores};
use crate::utils::now_millis;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub enum StorageJob {
    /// Roll the enemy's drop table and place the result where it died
    RollDrop {
        state: Arc<GameState>,
        enemy_template_id: u32,
        x: f32,
        y: f32,
        now: u64,
    },
    /// Strip a dead player's items and scatter them around the death point
    DeathDrop {
        state: Arc<GameState>,
        account_id: i64,
        x: f32,
        y: f32,
    },
    SavePlayer(PlayerRecord),
    /// Acknowledged once every job queued before it has run
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for queueing storage jobs
#[derive(Clone)]
pub struct JobSender {
    tx: mpsc::UnboundedSender<StorageJob>,
}

impl JobSender {
    pub fn new(tx: mpsc::UnboundedSender<StorageJob>) -> Self {
        Self { tx }
    }

    /// Queues a job; false once the worker has stopped
    pub fn send(&self, job: StorageJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

/// Creates the job queue and the worker draining it
pub fn spawn_storage_worker(stores: Stores) -> (JobSender, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel::<StorageJob>();
    (JobSender::new(tx), run_storage_worker(rx, stores))
}

/// Drains `rx` one job at a time, in queue order
pub fn run_storage_worker(
    mut rx: mpsc::UnboundedReceiver<StorageJob>,
    stores: Stores,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            if let StorageJob::Flush(done) = job {
                let _ = done.send(());
                continue;
            }
            let stores = stores.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || run_job(job, &stores)).await {
                warn!("Storage job panicked: {}", e);
            }
        }
        debug!("Storage worker stopped");
    })
}

/// Executes one job against the stores. Failures are logged and dropped.
pub fn run_job(job: StorageJob, stores: &Stores) {
    match job {
        StorageJob::RollDrop {
            state,
            enemy_template_id,
            x,
            y,
            now,
        } => match stores.drops.roll(enemy_template_id, x, y, now) {
            Ok(Some(item)) => {
                debug!("Dropped {} at ({:.0}, {:.0})", item.name, x, y);
                state.add_world_item(item);
            }
            Ok(None) => {}
            Err(e) => warn!("Drop roll for enemy template {} failed: {}", enemy_template_id, e),
        },

        StorageJob::DeathDrop {
            state,
            account_id,
            x,
            y,
        } => match stores.inventory.take_all_for_death(account_id) {
            Ok(items) => {
                let now = now_millis();
                let mut rng = rand::thread_rng();
                let count = items.len();
                for (index, mut item) in items.into_iter().enumerate() {
                    let (ix, iy) = scatter_position(x, y, index, &mut rng);
                    item.x = ix;
                    item.y = iy;
                    item.dropped_at = now;
                    item.claimed_by = None;
                    state.add_world_item(item);
                }
                if count > 0 {
                    info!("Account {} dropped {} items on death", account_id, count);
                }
            }
            Err(e) => warn!("Death drop for account {} failed: {}", account_id, e),
        },

        StorageJob::SavePlayer(record) => {
            if let Err(e) = stores.players.save(&record) {
                warn!("Failed to save player {}: {}", record.username, e);
            }
        }

        StorageJob::Flush(done) => {
            let _ = done.send(());
        }
    }
}
