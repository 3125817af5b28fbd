//! Policies deciding when an incoming patch becomes a new snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::patch::PatchId;

/// What a strategy sees before patch `patch_id` is committed. The series
/// cover the patches since the current snapshot, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreationStrategyMetadata {
    /// Number of versions stored so far, including the one being added.
    pub num_version: u64,
    pub patch_id: PatchId,
    /// Change ratio of each patch against its predecessor.
    pub change_ratios: Vec<f64>,
    /// Change ratio of each patch against the current snapshot.
    pub aggregated_change_ratios: Vec<f64>,
    /// Running sum of `change_ratios` since the current snapshot.
    pub locally_aggregated_change_ratios: Vec<f64>,
    /// Size of the delta between the current snapshot and each patch.
    pub delta_sizes: Vec<u64>,
    /// Seconds spent appending each patch.
    pub ingestion_times: Vec<f64>,
    /// Number of triples in the current snapshot.
    pub last_snapshot_size: u64,
}

pub trait SnapshotCreationStrategy: Send + Sync + fmt::Debug {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCreateSnapshot;

impl SnapshotCreationStrategy for NeverCreateSnapshot {
    fn do_create(&self, _: &CreationStrategyMetadata) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCreateSnapshot;

impl SnapshotCreationStrategy for AlwaysCreateSnapshot {
    fn do_create(&self, _: &CreationStrategyMetadata) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CreateSnapshotEveryN {
    step: u64,
}

impl CreateSnapshotEveryN {
    pub fn new(step: u64) -> Self {
        CreateSnapshotEveryN { step: step.max(1) }
    }
}

impl Default for CreateSnapshotEveryN {
    fn default() -> Self {
        CreateSnapshotEveryN::new(5)
    }
}

impl SnapshotCreationStrategy for CreateSnapshotEveryN {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        metadata.num_version % self.step == 0
    }
}

/// What the current aggregated delta size is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeBase {
    #[default]
    MeanDelta,
    LastSnapshot,
}

#[derive(Debug, Clone, Copy)]
pub struct SizeRatioStrategy {
    ratio: f64,
    base: SizeBase,
}

impl SizeRatioStrategy {
    pub fn new(ratio: f64, base: SizeBase) -> Self {
        SizeRatioStrategy { ratio, base }
    }
}

impl SnapshotCreationStrategy for SizeRatioStrategy {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        let Some(current) = metadata.delta_sizes.last() else {
            return false;
        };
        let base = match self.base {
            SizeBase::MeanDelta => {
                let sum: u64 = metadata.delta_sizes.iter().sum();
                sum as f64 / metadata.delta_sizes.len() as f64
            }
            SizeBase::LastSnapshot => metadata.last_snapshot_size as f64,
        };
        base > 0.0 && *current as f64 / base >= self.ratio
    }
}

/// Fires once ingesting a patch takes `ratio` times as long as the first
/// patch after the snapshot did.
#[derive(Debug, Clone, Copy)]
pub struct IngestionTimeRatioStrategy {
    ratio: f64,
}

impl IngestionTimeRatioStrategy {
    pub fn new(ratio: f64) -> Self {
        IngestionTimeRatioStrategy { ratio }
    }
}

impl SnapshotCreationStrategy for IngestionTimeRatioStrategy {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        match (metadata.ingestion_times.first(), metadata.ingestion_times.last()) {
            (Some(first), Some(last)) if *first > 0.0 => last / first >= self.ratio,
            _ => false,
        }
    }
}

/// Which ratio series a [`ChangeRatioStrategy`] watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioSeries {
    Change,
    Aggregated,
    LocallyAggregated,
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeRatioStrategy {
    threshold: f64,
    series: RatioSeries,
}

impl ChangeRatioStrategy {
    pub fn new(threshold: f64, series: RatioSeries) -> Self {
        ChangeRatioStrategy { threshold, series }
    }
}

impl SnapshotCreationStrategy for ChangeRatioStrategy {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        let series = match self.series {
            RatioSeries::Change => &metadata.change_ratios,
            RatioSeries::Aggregated => &metadata.aggregated_change_ratios,
            RatioSeries::LocallyAggregated => &metadata.locally_aggregated_change_ratios,
        };
        series.last().is_some_and(|r| *r >= self.threshold)
    }
}

#[derive(Debug)]
pub struct AndStrategy(pub Vec<Box<dyn SnapshotCreationStrategy>>);

impl SnapshotCreationStrategy for AndStrategy {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        !self.0.is_empty() && self.0.iter().all(|s| s.do_create(metadata))
    }
}

#[derive(Debug)]
pub struct OrStrategy(pub Vec<Box<dyn SnapshotCreationStrategy>>);

impl SnapshotCreationStrategy for OrStrategy {
    fn do_create(&self, metadata: &CreationStrategyMetadata) -> bool {
        self.0.iter().any(|s| s.do_create(metadata))
    }
}

/// Serializable description of a strategy, as stored in the store config.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    #[default]
    Never,
    Always,
    EveryN {
        n: u64,
    },
    SizeRatio {
        ratio: f64,
        #[serde(default)]
        base: SizeBase,
    },
    IngestionTimeRatio {
        ratio: f64,
    },
    ChangeRatio {
        threshold: f64,
    },
    AggregatedChangeRatio {
        threshold: f64,
    },
    LocallyAggregatedChangeRatio {
        threshold: f64,
    },
    And {
        strategies: Vec<StrategyConfig>,
    },
    Or {
        strategies: Vec<StrategyConfig>,
    },
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn SnapshotCreationStrategy> {
        match self {
            StrategyConfig::Never => Box::new(NeverCreateSnapshot),
            StrategyConfig::Always => Box::new(AlwaysCreateSnapshot),
            StrategyConfig::EveryN { n } => Box::new(CreateSnapshotEveryN::new(*n)),
            StrategyConfig::SizeRatio { ratio, base } => {
                Box::new(SizeRatioStrategy::new(*ratio, *base))
            }
            StrategyConfig::IngestionTimeRatio { ratio } => {
                Box::new(IngestionTimeRatioStrategy::new(*ratio))
            }
            StrategyConfig::ChangeRatio { threshold } => {
                Box::new(ChangeRatioStrategy::new(*threshold, RatioSeries::Change))
            }
            StrategyConfig::AggregatedChangeRatio { threshold } => {
                Box::new(ChangeRatioStrategy::new(*threshold, RatioSeries::Aggregated))
            }
            StrategyConfig::LocallyAggregatedChangeRatio { threshold } => Box::new(
                ChangeRatioStrategy::new(*threshold, RatioSeries::LocallyAggregated),
            ),
            StrategyConfig::And { strategies } => {
                Box::new(AndStrategy(strategies.iter().map(|s| s.build()).collect()))
            }
            StrategyConfig::Or { strategies } => {
                Box::new(OrStrategy(strategies.iter().map(|s| s.build()).collect()))
            }
        }
    }

    /// True when evaluating the strategy needs the change-ratio series,
    /// which cost a delta computation per appended patch.
    pub fn needs_change_ratios(&self) -> bool {
        match self {
            StrategyConfig::ChangeRatio { .. }
            | StrategyConfig::AggregatedChangeRatio { .. }
            | StrategyConfig::LocallyAggregatedChangeRatio { .. } => true,
            StrategyConfig::And { strategies } | StrategyConfig::Or { strategies } => {
                strategies.iter().any(|s| s.needs_change_ratios())
            }
            _ => false,
        }
    }

    /// Parse the short form used on the command line: `never`, `always`,
    /// `every:N`, `size:R`, `time:R`, `change:T`, `aggregated:T`, `local:T`.
    pub fn parse_short(s: &str) -> Result<Self, String> {
        let (name, arg) = match s.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (s, None),
        };
        let float = |a: Option<&str>| -> Result<f64, String> {
            a.ok_or_else(|| format!("strategy '{name}' needs an argument"))?
                .parse::<f64>()
                .map_err(|e| format!("bad argument for '{name}': {e}"))
        };
        match name {
            "never" => Ok(StrategyConfig::Never),
            "always" => Ok(StrategyConfig::Always),
            "every" => Ok(StrategyConfig::EveryN {
                n: arg
                    .unwrap_or("5")
                    .parse()
                    .map_err(|e| format!("bad argument for 'every': {e}"))?,
            }),
            "size" => Ok(StrategyConfig::SizeRatio {
                ratio: float(arg)?,
                base: SizeBase::MeanDelta,
            }),
            "time" => Ok(StrategyConfig::IngestionTimeRatio { ratio: float(arg)? }),
            "change" => Ok(StrategyConfig::ChangeRatio {
                threshold: float(arg)?,
            }),
            "aggregated" => Ok(StrategyConfig::AggregatedChangeRatio {
                threshold: float(arg)?,
            }),
            "local" => Ok(StrategyConfig::LocallyAggregatedChangeRatio {
                threshold: float(arg)?,
            }),
            other => Err(format!("unknown snapshot strategy '{other}'")),
        }
    }
}

impl fmt::Display for StrategyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, items: &[StrategyConfig]| {
            write!(f, "(")?;
            for (i, s) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{s}")?;
            }
            write!(f, ")")
        };
        match self {
            StrategyConfig::Never => write!(f, "never"),
            StrategyConfig::Always => write!(f, "always"),
            StrategyConfig::EveryN { n } => write!(f, "every {n} versions"),
            StrategyConfig::SizeRatio { ratio, base } => match base {
                SizeBase::MeanDelta => write!(f, "delta size >= {ratio} x mean delta size"),
                SizeBase::LastSnapshot => write!(f, "delta size >= {ratio} x snapshot size"),
            },
            StrategyConfig::IngestionTimeRatio { ratio } => {
                write!(f, "ingestion time >= {ratio} x first ingestion time")
            }
            StrategyConfig::ChangeRatio { threshold } => write!(f, "change ratio >= {threshold}"),
            StrategyConfig::AggregatedChangeRatio { threshold } => {
                write!(f, "aggregated change ratio >= {threshold}")
            }
            StrategyConfig::LocallyAggregatedChangeRatio { threshold } => {
                write!(f, "locally aggregated change ratio >= {threshold}")
            }
            StrategyConfig::And { strategies } => join(f, "and", strategies),
            StrategyConfig::Or { strategies } => join(f, "or", strategies),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(num_version: u64) -> CreationStrategyMetadata {
        CreationStrategyMetadata {
            num_version,
            patch_id: num_version,
            ..Default::default()
        }
    }

    #[test]
    fn simple_strategies() {
        assert!(!NeverCreateSnapshot.do_create(&meta(5)));
        assert!(AlwaysCreateSnapshot.do_create(&meta(1)));
        let every = CreateSnapshotEveryN::default();
        assert!(every.do_create(&meta(5)));
        assert!(every.do_create(&meta(10)));
        assert!(!every.do_create(&meta(6)));
        assert!(CreateSnapshotEveryN::new(2).do_create(&meta(4)));
    }

    #[test]
    fn ratio_strategies() {
        let m = CreationStrategyMetadata {
            delta_sizes: vec![10, 10, 40],
            ingestion_times: vec![0.5, 0.6, 2.0],
            change_ratios: vec![0.1, 0.3],
            aggregated_change_ratios: vec![0.1, 0.35],
            locally_aggregated_change_ratios: vec![0.1, 0.4],
            last_snapshot_size: 100,
            ..meta(3)
        };
        assert!(SizeRatioStrategy::new(2.0, SizeBase::MeanDelta).do_create(&m));
        assert!(!SizeRatioStrategy::new(0.5, SizeBase::LastSnapshot).do_create(&m));
        assert!(IngestionTimeRatioStrategy::new(4.0).do_create(&m));
        assert!(!IngestionTimeRatioStrategy::new(5.0).do_create(&m));
        assert!(ChangeRatioStrategy::new(0.3, RatioSeries::Change).do_create(&m));
        assert!(!ChangeRatioStrategy::new(0.36, RatioSeries::Aggregated).do_create(&m));
        assert!(ChangeRatioStrategy::new(0.4, RatioSeries::LocallyAggregated).do_create(&m));
        assert!(!ChangeRatioStrategy::new(0.1, RatioSeries::Change).do_create(&meta(1)));
    }

    #[test]
    fn composites_and_config() {
        let config = StrategyConfig::And {
            strategies: vec![
                StrategyConfig::EveryN { n: 2 },
                StrategyConfig::ChangeRatio { threshold: 0.2 },
            ],
        };
        assert!(config.needs_change_ratios());
        let strategy = config.build();
        let mut m = meta(4);
        assert!(!strategy.do_create(&m));
        m.change_ratios.push(0.5);
        assert!(strategy.do_create(&m));
        let or = StrategyConfig::Or {
            strategies: vec![StrategyConfig::Never, StrategyConfig::EveryN { n: 3 }],
        };
        assert!(or.build().do_create(&meta(3)));
        assert!(!StrategyConfig::And { strategies: vec![] }.build().do_create(&m));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"and\""));
        assert_eq!(serde_json::from_str::<StrategyConfig>(&json).unwrap(), config);
        assert_eq!(config.to_string(), "(every 2 versions and change ratio >= 0.2)");
    }

    #[test]
    fn short_form() {
        assert_eq!(
            StrategyConfig::parse_short("every:3"),
            Ok(StrategyConfig::EveryN { n: 3 })
        );
        assert_eq!(
            StrategyConfig::parse_short("every"),
            Ok(StrategyConfig::EveryN { n: 5 })
        );
        assert_eq!(
            StrategyConfig::parse_short("change:0.5"),
            Ok(StrategyConfig::ChangeRatio { threshold: 0.5 })
        );
        assert!(StrategyConfig::parse_short("size").is_err());
        assert!(StrategyConfig::parse_short("weekly").is_err());
    }
}
