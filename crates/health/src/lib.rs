//! Memory guard — resident-set policy with triggered reclamation.
//!
//! Every `check_interval` the guard samples the process's resident
//! memory:
//! - above `critical`, the `on_critical` callback fires (drain in-flight
//!   turns and exit cleanly);
//! - above `gc_trigger` and past the cooldown, the reclamation hook runs
//!   (drop idle sessions, shrink caches) and its effect is measured;
//!   freeing ≤ 5 MiB counts as a failure, and enough consecutive
//!   failures flip the guard into emergency mode and fire the recovery
//!   hook;
//! - at or below `gc_trigger`, the failure counter decays and emergency
//!   clears.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

/// A reclamation that frees no more than this counts as a failure.
const RECLAIM_FLOOR_BYTES: u64 = 5 * 1024 * 1024;

pub type Hook = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct MemoryGuardConfig {
    /// Reclamation threshold, bytes of resident memory.
    pub gc_trigger: u64,
    /// Shutdown threshold, bytes of resident memory.
    pub critical: u64,
    /// Minimum spacing between reclamations.
    pub cooldown: Duration,
    /// Consecutive ineffective reclamations before emergency mode.
    pub failure_threshold: u32,
    pub check_interval: Duration,
}

impl Default for MemoryGuardConfig {
    fn default() -> Self {
        Self {
            gc_trigger: 80 * 1024 * 1024,
            critical: 120 * 1024 * 1024,
            cooldown: Duration::from_secs(60),
            failure_threshold: 3,
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MemoryGuardStats {
    pub resident_bytes: u64,
    pub reclaim_failures: u32,
    pub total_reclaims: u64,
    pub emergency_mode: bool,
}

struct GuardState {
    last_reclaim: Option<std::time::Instant>,
    failures: u32,
    total_reclaims: u64,
    emergency: bool,
}

pub struct MemoryGuard {
    config: MemoryGuardConfig,
    state: Mutex<GuardState>,
    /// Frees what can be freed: idle sessions, soft caches.
    on_reclaim: Hook,
    /// Last resort after repeated ineffective reclamations.
    on_emergency: Hook,
    /// Graceful-shutdown trigger.
    on_critical: Hook,
}

impl MemoryGuard {
    pub fn new(
        config: MemoryGuardConfig,
        on_reclaim: Hook,
        on_emergency: Hook,
        on_critical: Hook,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(GuardState {
                last_reclaim: None,
                failures: 0,
                total_reclaims: 0,
                emergency: false,
            }),
            on_reclaim,
            on_emergency,
            on_critical,
        })
    }

    /// Spawn the periodic monitor task.
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(guard.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let resident = resident_memory();
                guard.check(resident);
            }
        })
    }

    /// One policy evaluation against a memory sample. Public so the tick
    /// can be driven directly in tests.
    pub fn check(&self, resident: u64) {
        if resident > self.config.critical {
            error!(
                resident_mb = resident / 1024 / 1024,
                critical_mb = self.config.critical / 1024 / 1024,
                "critical memory usage, initiating graceful shutdown"
            );
            (self.on_critical)();
            return;
        }

        if resident > self.config.gc_trigger {
            let now = std::time::Instant::now();
            {
                let state = self.state.lock().expect("guard lock");
                if let Some(last) = state.last_reclaim {
                    if now.duration_since(last) < self.config.cooldown {
                        debug!(
                            resident_mb = resident / 1024 / 1024,
                            "reclaim cooldown, skipping"
                        );
                        return;
                    }
                }
            }

            warn!(
                resident_mb = resident / 1024 / 1024,
                "high memory usage, reclaiming"
            );
            (self.on_reclaim)();
            let after = resident_memory();

            let mut state = self.state.lock().expect("guard lock");
            state.last_reclaim = Some(now);
            state.total_reclaims += 1;

            if after + RECLAIM_FLOOR_BYTES >= resident {
                state.failures += 1;
                warn!(
                    before_mb = resident / 1024 / 1024,
                    after_mb = after / 1024 / 1024,
                    failures = state.failures,
                    "reclamation ineffective"
                );
                if state.failures >= self.config.failure_threshold && !state.emergency {
                    error!("repeated ineffective reclamations, entering emergency mode");
                    state.emergency = true;
                    drop(state);
                    (self.on_emergency)();
                }
            } else {
                state.failures = 0;
                info!(
                    freed_mb = (resident - after) / 1024 / 1024,
                    current_mb = after / 1024 / 1024,
                    "reclamation successful"
                );
            }
        } else {
            let mut state = self.state.lock().expect("guard lock");
            if state.failures > 0 {
                state.failures -= 1;
            }
            state.emergency = false;
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.state.lock().expect("guard lock").emergency
    }

    pub fn stats(&self) -> MemoryGuardStats {
        let state = self.state.lock().expect("guard lock");
        MemoryGuardStats {
            resident_bytes: resident_memory(),
            reclaim_failures: state.failures,
            total_reclaims: state.total_reclaims,
            emergency_mode: state.emergency,
        }
    }
}

/// Resident set size of this process, in bytes.
pub fn resident_memory() -> u64 {
    let pid = Pid::from_u32(std::process::id());
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
    sys.process(pid).map(|p| p.memory()).unwrap_or(0)
}
