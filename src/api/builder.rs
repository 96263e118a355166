//! Memory object builder.
//!
//! A builder collects a policy, the tier backends with their capacity
//! ratios, and (for the dynamic-threshold policy) the threshold
//! configuration, then validates everything at once in [`TierBuilder::construct`].
//! Data-hotness construction also brings up the whole engine: the event
//! queue, the registry and the ranking worker.

use std::sync::Arc;

use dashmap::DashMap;

use crate::api::config::EngineConfig;
use crate::api::memory::{HotnessEngine, TierConfig, TieredMemory};
use crate::api::stats::EngineCounters;
use crate::backend::{BackendRef, TierGrade};
use crate::core::counters::SizeCounters;
use crate::core::events;
use crate::core::hotness::HotnessParams;
use crate::core::ranking::Ranking;
use crate::core::registry::TypeRegistry;
use crate::core::worker::{RankingWorker, WorkerConfig};
use crate::error::TierError;
use crate::policy::data_hotness::DataHotnessPolicy;
use crate::policy::dynamic_threshold::{
    DynamicThresholdPolicy, ThresholdLevel, THRESHOLD_CHECK_CNT, THRESHOLD_DEGREE, THRESHOLD_STEP,
    THRESHOLD_TRIGGER,
};
use crate::policy::static_ratio::StaticRatioPolicy;
use crate::policy::{PolicyKind, TierPolicy};
use crate::sync::atomics::AtomicF64;

struct BuilderTier {
    backend: BackendRef,
    ratio: f64,
}

#[derive(Debug, Clone, Copy)]
struct ThresholdSeed {
    val: usize,
    min: usize,
    max: usize,
}

/// Staged configuration for a [`TieredMemory`].
pub struct TierBuilder {
    policy: PolicyKind,
    engine_config: EngineConfig,
    tiers: Vec<BuilderTier>,
    thresholds: Vec<ThresholdSeed>,
    check_cnt: u32,
    trigger: f64,
    degree: f64,
}

impl TierBuilder {
    /// Start a builder for `policy`.
    pub fn new(policy: PolicyKind) -> Self {
        Self {
            policy,
            engine_config: EngineConfig::default(),
            tiers: Vec::new(),
            thresholds: Vec::new(),
            check_cnt: THRESHOLD_CHECK_CNT,
            trigger: THRESHOLD_TRIGGER,
            degree: THRESHOLD_DEGREE,
        }
    }

    /// Replace the engine configuration (data-hotness policy only).
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Register `backend` as the next tier with capacity ratio `ratio`.
    pub fn add_tier(&mut self, backend: BackendRef, ratio: u32) -> Result<(), TierError> {
        if ratio == 0 {
            return Err(TierError::InvalidRatio);
        }
        if self
            .tiers
            .iter()
            .any(|tier| Arc::ptr_eq(&tier.backend, &backend))
        {
            log::error!("builder: backend {} added twice", backend.name());
            return Err(TierError::DuplicateTier);
        }
        if self.policy == PolicyKind::DynamicThreshold && !self.tiers.is_empty() {
            // Auto-derive a threshold band between the new tier and its
            // predecessor; ctl keys may override it before construction.
            let index = self.tiers.len() - 1;
            self.thresholds.push(ThresholdSeed {
                val: THRESHOLD_STEP * self.tiers.len(),
                min: THRESHOLD_STEP / 2 + THRESHOLD_STEP * index,
                max: THRESHOLD_STEP + THRESHOLD_STEP / 2 + THRESHOLD_STEP * index - 1,
            });
        }
        self.tiers.push(BuilderTier {
            backend,
            ratio: f64::from(ratio),
        });
        Ok(())
    }

    /// Set a string-keyed configuration option.
    ///
    /// Keys follow `policy.dynamic_threshold.…` (the `policy.` prefix is
    /// optional): `thresholds[i].val|min|max`, `check_cnt`, `trigger`,
    /// `degree`. Only meaningful for the dynamic-threshold policy; other
    /// policies reject every key.
    pub fn ctl_set(&mut self, key: &str, value: &str) -> Result<(), TierError> {
        if self.policy != PolicyKind::DynamicThreshold {
            log::error!("builder: invalid configuration key: {}", key);
            return Err(TierError::InvalidCtlKey(key.to_string()));
        }
        let rest = key.strip_prefix("policy.").unwrap_or(key);
        let Some(rest) = rest.strip_prefix("dynamic_threshold.") else {
            log::error!("builder: invalid configuration key: {}", key);
            return Err(TierError::InvalidCtlKey(key.to_string()));
        };
        if let Some(rest) = rest.strip_prefix("thresholds[") {
            let Some((index_str, field)) = rest.split_once("].") else {
                return Err(TierError::InvalidCtlKey(key.to_string()));
            };
            let index: usize = index_str
                .parse()
                .map_err(|_| TierError::InvalidCtlKey(key.to_string()))?;
            if index + 1 >= self.tiers.len() {
                log::error!(
                    "builder: threshold index {} needs more tiers than the {} defined",
                    index,
                    self.tiers.len()
                );
                return Err(TierError::ThresholdIndex { index });
            }
            let parsed = parse_value::<usize>(key, value)?;
            let seed = &mut self.thresholds[index];
            match field {
                "val" => seed.val = parsed,
                "min" => seed.min = parsed,
                "max" => seed.max = parsed,
                _ => return Err(TierError::InvalidCtlKey(key.to_string())),
            }
            return Ok(());
        }
        match rest {
            "check_cnt" => self.check_cnt = parse_value(key, value)?,
            "trigger" => self.trigger = parse_value(key, value)?,
            "degree" => self.degree = parse_value(key, value)?,
            _ => {
                log::error!("builder: invalid configuration key: {}", key);
                return Err(TierError::InvalidCtlKey(key.to_string()));
            }
        }
        Ok(())
    }

    /// Validate the staged configuration and build the memory object.
    pub fn construct(self) -> Result<TieredMemory, TierError> {
        self.log_configuration();
        match self.policy {
            PolicyKind::StaticRatio => self.construct_static(),
            PolicyKind::DynamicThreshold => self.construct_dynamic(),
            PolicyKind::DataHotness => self.construct_data_hotness(),
        }
    }

    fn construct_static(self) -> Result<TieredMemory, TierError> {
        if self.tiers.is_empty() {
            log::error!("builder: no tier in builder");
            return Err(TierError::NoTiers);
        }
        let counters = Arc::new(SizeCounters::new(self.tiers.len()));
        let ratios: Vec<f64> = self.tiers.iter().map(|tier| tier.ratio).collect();
        let policy = if self.tiers.len() == 1 {
            TierPolicy::SingleTier
        } else {
            TierPolicy::StaticRatio(StaticRatioPolicy::new(&ratios, counters.clone()))
        };
        let base = ratios[0];
        let tiers = self
            .tiers
            .into_iter()
            .map(|tier| TierConfig {
                ratio: base / tier.ratio,
                backend: tier.backend,
            })
            .collect();
        Ok(TieredMemory::from_parts(tiers, policy, counters, None))
    }

    fn construct_dynamic(self) -> Result<TieredMemory, TierError> {
        if self.tiers.len() < 2 {
            log::error!(
                "builder: at least 2 tiers are required for the dynamic-threshold policy"
            );
            return Err(TierError::TierCount {
                policy: PolicyKind::DynamicThreshold,
                required: "at least 2",
                actual: self.tiers.len(),
            });
        }
        if self.trigger < 0.0 {
            return Err(TierError::NegativeParam { name: "trigger" });
        }
        if self.degree < 0.0 {
            return Err(TierError::NegativeParam { name: "degree" });
        }
        let mut levels = Vec::with_capacity(self.thresholds.len());
        for (index, seed) in self.thresholds.iter().enumerate() {
            if seed.min > seed.val || seed.val > seed.max {
                log::error!(
                    "builder: threshold {} out of range (min {}, val {}, max {})",
                    index,
                    seed.min,
                    seed.val,
                    seed.max
                );
                return Err(TierError::ThresholdRange {
                    index,
                    min: seed.min,
                    val: seed.val,
                    max: seed.max,
                });
            }
            if index > 0 && self.thresholds[index - 1].max > seed.min {
                log::error!("builder: threshold {} band overlaps its predecessor", index);
                return Err(TierError::ThresholdOverlap { index });
            }
            let expected_ratio = self.tiers[index + 1].ratio / self.tiers[index].ratio;
            levels.push(ThresholdLevel::new(
                seed.val,
                seed.min,
                seed.max,
                expected_ratio,
            ));
        }
        let counters = Arc::new(SizeCounters::new(self.tiers.len()));
        let policy = TierPolicy::DynamicThreshold(DynamicThresholdPolicy::new(
            levels,
            counters.clone(),
            self.check_cnt,
            self.trigger,
            self.degree,
        ));
        let base = self.tiers[0].ratio;
        let tiers = self
            .tiers
            .into_iter()
            .map(|tier| TierConfig {
                ratio: base / tier.ratio,
                backend: tier.backend,
            })
            .collect();
        Ok(TieredMemory::from_parts(tiers, policy, counters, None))
    }

    fn construct_data_hotness(self) -> Result<TieredMemory, TierError> {
        if self.tiers.len() != 2 {
            log::error!("builder: incorrect number of tiers for the data-hotness policy");
            return Err(TierError::TierCount {
                policy: PolicyKind::DataHotness,
                required: "exactly 2",
                actual: self.tiers.len(),
            });
        }
        let fast_tiers: Vec<usize> = self
            .tiers
            .iter()
            .enumerate()
            .filter(|(_, tier)| tier.backend.grade() == TierGrade::Fast)
            .map(|(index, _)| index)
            .collect();
        let [hot_tier] = fast_tiers.as_slice() else {
            log::error!("builder: no unambiguous tier suitable for hot memory");
            return Err(TierError::NoFastTier);
        };
        let hot_tier = *hot_tier;
        let cold_tier = 1 - hot_tier;

        let ratio_sum: f64 = self.tiers.iter().map(|tier| tier.ratio).sum();
        let normalized: Vec<f64> = self
            .tiers
            .iter()
            .map(|tier| tier.ratio / ratio_sum)
            .collect();
        let fast_tier_fraction = normalized[hot_tier];

        let config = &self.engine_config;
        let (producer, consumer) = events::bounded(config.queue_capacity);
        let threshold = Arc::new(AtomicF64::new(0.0));
        let hotness_cache = Arc::new(DashMap::new());
        let address_index = Arc::new(DashMap::new());
        let counters = Arc::new(EngineCounters::new());
        let registry = TypeRegistry::new(
            Ranking::new(threshold.clone()),
            HotnessParams {
                window: config.window,
                old_weight: config.old_window_weight,
            },
            config.malloc_touch_weight,
            hotness_cache.clone(),
            address_index.clone(),
        );
        let worker = RankingWorker::spawn(
            consumer,
            registry,
            WorkerConfig {
                refresh_events: config.refresh_events,
                refresh_interval: config.refresh_interval,
                idle_sleep: config.idle_sleep,
                fast_tier_fraction,
            },
            counters.clone(),
        )?;
        log::debug!(
            "builder: data-hotness engine up (hot tier {}, fast-tier fraction {:.3})",
            hot_tier,
            fast_tier_fraction
        );

        let policy = TierPolicy::DataHotness(DataHotnessPolicy::new(
            hot_tier,
            cold_tier,
            threshold.clone(),
            hotness_cache.clone(),
            producer.clone(),
            counters.clone(),
            config.stack_depth,
        ));
        let size_counters = Arc::new(SizeCounters::new(self.tiers.len()));
        let tiers = self
            .tiers
            .into_iter()
            .zip(normalized)
            .map(|(tier, ratio)| TierConfig {
                backend: tier.backend,
                ratio,
            })
            .collect();
        let engine = HotnessEngine {
            producer,
            worker,
            threshold,
            hotness_cache,
            address_index,
            counters,
        };
        Ok(TieredMemory::from_parts(
            tiers,
            policy,
            size_counters,
            Some(engine),
        ))
    }

    fn log_configuration(&self) {
        log::debug!(
            "builder: policy {:?}, {} tiers",
            self.policy,
            self.tiers.len()
        );
        for (index, tier) in self.tiers.iter().enumerate() {
            log::debug!(
                "builder: tier {} - backend {} ({:?}), ratio {}",
                index,
                tier.backend.name(),
                tier.backend.grade(),
                tier.ratio
            );
        }
        for (index, seed) in self.thresholds.iter().enumerate() {
            log::debug!(
                "builder: threshold {} - min {}, val {}, max {}",
                index,
                seed.min,
                seed.val,
                seed.max
            );
        }
        if self.policy == PolicyKind::DynamicThreshold {
            log::debug!(
                "builder: check_cnt {}, trigger {}, degree {}",
                self.check_cnt,
                self.trigger,
                self.degree
            );
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, TierError> {
    value.parse().map_err(|_| {
        log::error!("builder: invalid value {} for key {}", value, key);
        TierError::InvalidCtlValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    })
}
