// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::bridge::BridgeConfig;
use crate::job_engine::PoolConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub pool: PoolConfig,
    pub bridge: BridgeConfig,
}

// The actual static variable. It starts empty and is set once in main().
pub static CONFIG: OnceLock<GlobalConfig> = OnceLock::new();

pub fn initialize_global_config(config: GlobalConfig) -> anyhow::Result<()> {
    if CONFIG.set(config).is_err() {
        anyhow::bail!("global config has already been initialized");
    }
    Ok(())
}

/// Pool settings, or the defaults when nothing was initialized.
pub fn get_pool_config() -> PoolConfig {
    CONFIG
        .get()
        .map(|config| config.pool.clone())
        .unwrap_or_default()
}

/// Bridge settings, or the defaults (honoring `BRIDGE_THREADS`) when nothing
/// was initialized.
pub fn get_bridge_config() -> BridgeConfig {
    CONFIG
        .get()
        .map(|config| config.bridge.clone())
        .unwrap_or_default()
}
