//! Periodic sweep and snapshot task.

use std::sync::Arc;

use hodld_log::{log_debug, log_info, log_warn};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::manager::Registry;

/// Runs `check_and_remove` every maintenance interval and writes the
/// snapshot every dump interval until `shutdown` flips to true, then writes
/// one final snapshot.
pub async fn run_maintenance(registry: Arc<Registry>, mut shutdown: watch::Receiver<bool>) {
    let config = registry.config().clone();
    let start = Instant::now();
    let mut sweep = interval_at(start + config.maintenance_interval, config.maintenance_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dump = interval_at(start + config.dump_interval, config.dump_interval);
    dump.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sweep.tick() => {
                let removed = registry.check_and_remove(false);
                if removed > 0 {
                    log_info!("Masternode sweep removed {removed}; {registry}");
                } else {
                    log_debug!("Masternode sweep: {registry}");
                }
            }
            _ = dump.tick() => write_snapshot(&registry),
        }
    }

    write_snapshot(&registry);
}

fn write_snapshot(registry: &Registry) {
    if let Err(err) = registry.dump() {
        log_warn!("Failed to write masternode snapshot: {err}");
    }
}
