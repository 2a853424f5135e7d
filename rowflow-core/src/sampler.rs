//! Samplers: which raw samples a source reads, and in what order
//!
//! A [`SamplerSpec`] is checked when it is constructed and turned into an
//! immutable [`BuiltSampler`] once the source cardinality is known. Every
//! randomized variant draws from a generator seeded by the caller, so the
//! same seed always yields the same index sequence.

use std::fmt;
use std::sync::Arc;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::source::ClassIndex;

/// Sampler description, validated at construction
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerSpec {
    /// Contiguous range starting at `start`
    Sequential {
        /// First index
        start: usize,
        /// Number of indices, 0 for all remaining
        num_samples: usize,
    },

    /// Uniform random order or draws
    Random {
        /// Draw with replacement
        replacement: bool,
        /// Number of indices, 0 for the cardinality
        num_samples: usize,
    },

    /// Disjoint strided shard of the index space
    Distributed {
        /// Number of shards
        num_shards: usize,
        /// This shard
        shard_id: usize,
        /// Permute the index space (with the seed) before sharding
        shuffle: bool,
    },

    /// `per_class` samples from every class
    Pk {
        /// Samples per class
        per_class: usize,
        /// Shuffle members and the final order
        shuffle: bool,
    },

    /// Draws proportional to per-index weights
    WeightedRandom {
        /// Weight per index
        weights: Vec<f64>,
        /// Number of draws, 0 for the default
        num_samples: usize,
        /// Draw with replacement
        replacement: bool,
    },

    /// Explicit index list
    Subset {
        /// Indices to read
        indices: Vec<usize>,
        /// Permute the list
        shuffle: bool,
    },
}

fn non_negative(what: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::InvalidArgument(format!("{what} must be non-negative, got {value}")))
}

impl SamplerSpec {
    /// Sequential sampler over `start..start + num_samples`
    pub fn sequential(start: i64, num_samples: i64) -> Result<Self> {
        Ok(SamplerSpec::Sequential {
            start: non_negative("sequential sampler start index", start)?,
            num_samples: non_negative("sequential sampler num_samples", num_samples)?,
        })
    }

    /// Random sampler
    pub fn random(replacement: bool, num_samples: i64) -> Result<Self> {
        Ok(SamplerSpec::Random {
            replacement,
            num_samples: non_negative("random sampler num_samples", num_samples)?,
        })
    }

    /// Distributed sampler returning shard `shard_id` of `num_shards`
    pub fn distributed(num_shards: i64, shard_id: i64) -> Result<Self> {
        if num_shards <= 0 {
            return Err(Error::InvalidArgument(format!(
                "distributed sampler num_shards must be positive, got {num_shards}"
            )));
        }
        if shard_id < 0 || shard_id >= num_shards {
            return Err(Error::InvalidArgument(format!(
                "distributed sampler shard_id must be in [0, {num_shards}), got {shard_id}"
            )));
        }
        Ok(SamplerSpec::Distributed {
            num_shards: non_negative("num_shards", num_shards)?,
            shard_id: non_negative("shard_id", shard_id)?,
            shuffle: false,
        })
    }

    /// PK sampler taking `per_class` samples from each class
    pub fn pk(per_class: i64) -> Result<Self> {
        if per_class <= 0 {
            return Err(Error::InvalidArgument(format!(
                "pk sampler samples per class must be positive, got {per_class}"
            )));
        }
        Ok(SamplerSpec::Pk {
            per_class: non_negative("per_class", per_class)?,
            shuffle: false,
        })
    }

    /// Weighted random sampler
    pub fn weighted_random(weights: Vec<f64>, num_samples: i64, replacement: bool) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::InvalidArgument("weighted random sampler needs weights".into()));
        }
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(Error::InvalidArgument(format!(
                "weighted random sampler weights must be finite and non-negative, got {bad}"
            )));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidArgument(
                "weighted random sampler weights must not all be zero".into(),
            ));
        }
        let num_samples = non_negative("weighted random sampler num_samples", num_samples)?;
        let positive = weights.iter().filter(|w| **w > 0.0).count();
        if !replacement && num_samples > positive {
            return Err(Error::InvalidArgument(format!(
                "cannot draw {num_samples} samples without replacement from {positive} positive weights"
            )));
        }
        Ok(SamplerSpec::WeightedRandom {
            weights,
            num_samples,
            replacement,
        })
    }

    /// Subset sampler visiting `indices` in a random order
    pub fn subset_random(indices: Vec<i64>) -> Result<Self> {
        Self::subset_with(indices, true)
    }

    /// Subset sampler visiting `indices` in the given order
    pub fn subset(indices: Vec<i64>) -> Result<Self> {
        Self::subset_with(indices, false)
    }

    fn subset_with(indices: Vec<i64>, shuffle: bool) -> Result<Self> {
        let indices = indices
            .into_iter()
            .map(|i| non_negative("subset sampler index", i))
            .collect::<Result<Vec<_>>>()?;
        Ok(SamplerSpec::Subset { indices, shuffle })
    }

    /// Enable shuffling for the distributed, PK and subset variants
    #[must_use]
    pub fn with_shuffle(mut self, enable: bool) -> Self {
        match &mut self {
            SamplerSpec::Distributed { shuffle, .. }
            | SamplerSpec::Pk { shuffle, .. }
            | SamplerSpec::Subset { shuffle, .. } => *shuffle = enable,
            _ => {}
        }
        self
    }

    /// Whether building this sampler consumes randomness
    pub fn is_random(&self) -> bool {
        match self {
            SamplerSpec::Sequential { .. } => false,
            SamplerSpec::Random { .. } | SamplerSpec::WeightedRandom { .. } => true,
            SamplerSpec::Distributed { shuffle, .. }
            | SamplerSpec::Pk { shuffle, .. }
            | SamplerSpec::Subset { shuffle, .. } => *shuffle,
        }
    }

    /// Materialize the index sequence for a source of `cardinality` samples
    pub fn build(&self, cardinality: usize, seed: u64, classes: Option<&ClassIndex>) -> Result<BuiltSampler> {
        let mut rng = StdRng::seed_from_u64(seed);

        let indices: Vec<usize> = match self {
            SamplerSpec::Sequential { start, num_samples } => {
                if *start > cardinality {
                    return Err(Error::Config(format!(
                        "sequential sampler start index {start} exceeds dataset size {cardinality}"
                    )));
                }
                let available = cardinality - start;
                let count = if *num_samples == 0 {
                    available
                } else {
                    (*num_samples).min(available)
                };
                (*start..start + count).collect()
            }

            SamplerSpec::Random {
                replacement,
                num_samples,
            } => {
                let count = if *num_samples == 0 { cardinality } else { *num_samples };
                if cardinality == 0 {
                    Vec::new()
                } else if *replacement {
                    (0..count).map(|_| rng.gen_range(0..cardinality)).collect()
                } else {
                    let mut all: Vec<usize> = (0..cardinality).collect();
                    all.shuffle(&mut rng);
                    all.truncate(count.min(cardinality));
                    all
                }
            }

            SamplerSpec::Distributed {
                num_shards,
                shard_id,
                shuffle,
            } => {
                let mut all: Vec<usize> = (0..cardinality).collect();
                if *shuffle {
                    all.shuffle(&mut rng);
                }
                all.into_iter().skip(*shard_id).step_by(*num_shards).collect()
            }

            SamplerSpec::Pk { per_class, shuffle } => {
                let classes = classes.ok_or_else(|| {
                    Error::Config("pk sampler requires a labelled source".into())
                })?;
                let mut out = Vec::with_capacity(classes.len() * per_class);
                for members in classes.values() {
                    let mut members = members.clone();
                    if *shuffle {
                        members.shuffle(&mut rng);
                    }
                    out.extend((0..*per_class).map(|i| members[i % members.len()]));
                }
                if *shuffle {
                    out.shuffle(&mut rng);
                }
                out
            }

            SamplerSpec::WeightedRandom {
                weights,
                num_samples,
                replacement,
            } => {
                if weights.len() > cardinality {
                    return Err(Error::Config(format!(
                        "weighted random sampler has {} weights but the dataset has {cardinality} samples",
                        weights.len()
                    )));
                }
                if *replacement {
                    let count = if *num_samples == 0 { weights.len() } else { *num_samples };
                    let dist = WeightedIndex::new(weights)
                        .map_err(|e| Error::Config(format!("weighted random sampler: {e}")))?;
                    (0..count).map(|_| dist.sample(&mut rng)).collect()
                } else {
                    weighted_without_replacement(weights, *num_samples, &mut rng)
                }
            }

            SamplerSpec::Subset { indices, shuffle } => {
                if let Some(bad) = indices.iter().find(|i| **i >= cardinality) {
                    return Err(Error::Config(format!(
                        "subset sampler index {bad} out of range for dataset size {cardinality}"
                    )));
                }
                let mut out = indices.clone();
                if *shuffle {
                    out.shuffle(&mut rng);
                }
                out
            }
        };

        Ok(BuiltSampler {
            indices: indices.into_iter().map(|i| i as i64).collect(),
        })
    }
}

/// Weighted draw without replacement (Efraimidis–Spirakis keys)
fn weighted_without_replacement(weights: &[f64], num_samples: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut keyed: Vec<(f64, usize)> = weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0.0)
        .map(|(i, w)| (rng.gen::<f64>().powf(1.0 / w), i))
        .collect();
    let count = if num_samples == 0 { keyed.len() } else { num_samples };
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.into_iter().take(count).map(|(_, i)| i).collect()
}

impl fmt::Display for SamplerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerSpec::Sequential { start, num_samples } => {
                write!(f, "Sequential(start={start}, num_samples={num_samples})")
            }
            SamplerSpec::Random {
                replacement,
                num_samples,
            } => write!(f, "Random(replacement={replacement}, num_samples={num_samples})"),
            SamplerSpec::Distributed {
                num_shards,
                shard_id,
                ..
            } => write!(f, "Distributed({shard_id}/{num_shards})"),
            SamplerSpec::Pk { per_class, .. } => write!(f, "PK({per_class})"),
            SamplerSpec::WeightedRandom { weights, .. } => {
                write!(f, "WeightedRandom({} weights)", weights.len())
            }
            SamplerSpec::Subset { indices, shuffle } => {
                write!(f, "Subset({} indices, shuffle={shuffle})", indices.len())
            }
        }
    }
}

/// An immutable, finite index sequence bound to one cardinality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltSampler {
    indices: Arc<[i64]>,
}

impl BuiltSampler {
    /// The ordered index sequence
    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Number of indices
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if no index is selected
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
