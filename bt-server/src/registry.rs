use std::sync::Mutex;

use anyhow::{anyhow, Result};
use bt_common::Engine;
use dashmap::DashMap;

/// Holds every running simulation behind its own mutex, keyed by
/// simulation id. `Engine` offers no internal synchronization of its own
/// (`bt_common`'s concurrency policy is "one mutex per engine, owned by
/// the caller"), so the registry is what supplies that boundary.
pub struct SimulationRegistry {
    simulations: DashMap<String, Mutex<Engine>>,
}

impl SimulationRegistry {
    pub fn new() -> SimulationRegistry {
        SimulationRegistry {
            simulations: DashMap::new(),
        }
    }

    pub fn insert(&self, simulation_id: impl Into<String>, engine: Engine) {
        self.simulations.insert(simulation_id.into(), Mutex::new(engine));
    }

    /// Runs `f` against the named simulation's engine while holding its
    /// mutex, the only point of mutable access the registry hands out.
    pub fn with_engine<F, R>(&self, simulation_id: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Engine) -> Result<R>,
    {
        let entry = self
            .simulations
            .get(simulation_id)
            .ok_or_else(|| anyhow!("unknown simulation \"{simulation_id}\""))?;
        let mut engine = entry
            .lock()
            .map_err(|_| anyhow!("simulation \"{simulation_id}\" mutex poisoned"))?;
        f(&mut engine)
    }
}

impl Default for SimulationRegistry {
    fn default() -> SimulationRegistry {
        SimulationRegistry::new()
    }
}
