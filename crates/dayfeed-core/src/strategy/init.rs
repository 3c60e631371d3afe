use std::collections::BTreeMap;

use serde::Serialize;

use super::{InitializationContext, ServiceId};
use crate::config::{CacheConfig, Environment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategyKind {
    Test,
    Recovery,
    WarmRestart,
    BackgroundLaunch,
    ColdStart,
}

/// When a service is brought up during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Eager,
    Deferred,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitPlan {
    pub strategy: InitStrategyKind,
    pub phases: BTreeMap<ServiceId, Phase>,
    pub register_timers: bool,
    pub run_integrity_checks: bool,
    pub startup_sync: bool,
    /// Read and write lifecycle markers and flush counters on shutdown.
    pub wire_io: bool,
}

impl InitPlan {
    pub fn phase(&self, service: ServiceId) -> Phase {
        self.phases.get(&service).copied().unwrap_or(Phase::Eager)
    }
}

type InitRule = (fn(&InitializationContext, &CacheConfig) -> bool, InitStrategyKind);

fn is_test(ctx: &InitializationContext, _: &CacheConfig) -> bool {
    ctx.environment == Environment::Test
}

fn has_error_marker(ctx: &InitializationContext, _: &CacheConfig) -> bool {
    ctx.error_marker
}

fn is_recent_shutdown(ctx: &InitializationContext, config: &CacheConfig) -> bool {
    ctx.since_last_shutdown
        .is_some_and(|elapsed| elapsed < config.warm_restart_threshold)
}

fn is_background_launch(ctx: &InitializationContext, _: &CacheConfig) -> bool {
    ctx.background_launch
}

fn always(_: &InitializationContext, _: &CacheConfig) -> bool {
    true
}

/// Evaluated top to bottom; the last rule always matches.
const INIT_RULES: [InitRule; 5] = [
    (is_test, InitStrategyKind::Test),
    (has_error_marker, InitStrategyKind::Recovery),
    (is_recent_shutdown, InitStrategyKind::WarmRestart),
    (is_background_launch, InitStrategyKind::BackgroundLaunch),
    (always, InitStrategyKind::ColdStart),
];

pub fn select(ctx: &InitializationContext, config: &CacheConfig) -> InitStrategyKind {
    INIT_RULES
        .iter()
        .find(|(matches, _)| matches(ctx, config))
        .map(|(_, kind)| *kind)
        .unwrap_or(InitStrategyKind::ColdStart)
}

impl InitStrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitStrategyKind::Test => "test",
            InitStrategyKind::Recovery => "recovery",
            InitStrategyKind::WarmRestart => "warm_restart",
            InitStrategyKind::BackgroundLaunch => "background_launch",
            InitStrategyKind::ColdStart => "cold_start",
        }
    }

    pub fn plan(&self) -> InitPlan {
        use Phase::{Deferred, Eager, Skipped};

        // Phases in STARTUP_ORDER
        let (phases, register_timers, run_integrity_checks, startup_sync, wire_io) = match self {
            InitStrategyKind::Test => (
                [Eager, Eager, Eager, Skipped, Eager, Eager, Eager, Skipped],
                false,
                false,
                false,
                false,
            ),
            InitStrategyKind::Recovery => ([Eager; 8], true, true, true, true),
            InitStrategyKind::WarmRestart => (
                [Eager, Eager, Eager, Deferred, Deferred, Eager, Deferred, Deferred],
                true,
                false,
                false,
                true,
            ),
            InitStrategyKind::BackgroundLaunch => (
                [Eager, Eager, Eager, Deferred, Deferred, Eager, Skipped, Skipped],
                false,
                false,
                true,
                true,
            ),
            InitStrategyKind::ColdStart => (
                [Eager, Eager, Eager, Deferred, Deferred, Eager, Deferred, Deferred],
                true,
                false,
                true,
                true,
            ),
        };
        InitPlan {
            strategy: *self,
            phases: ServiceId::STARTUP_ORDER.iter().copied().zip(phases).collect(),
            register_timers,
            run_integrity_checks,
            startup_sync,
            wire_io,
        }
    }
}
