use crate::traffic::config::{TrafficConfig, TrafficPatternSpec};
use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
enum PatternKind {
    Strided { stride: u64 },
    Random { table: Vec<u64> },
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub name: String,
    pub req_bytes: u32,
    pub prefetch_distance: u32,
    within_bytes: u64,
    kind: PatternKind,
}

impl CompiledPattern {
    fn offset_bytes(&self, req_idx: u32) -> u64 {
        let req_bytes = self.req_bytes as u64;
        match &self.kind {
            PatternKind::Strided { stride } => (req_idx as u64)
                .saturating_mul(*stride)
                .saturating_mul(req_bytes),
            PatternKind::Random { table } => table
                .get(req_idx as usize)
                .copied()
                .unwrap_or(0)
                .saturating_mul(req_bytes),
        }
    }
}

/// Expands the configured patterns into one flat, deterministic stream of load addresses.
/// Patterns run back to back, `reqs_per_pattern` loads each.
#[derive(Debug, Clone, Default)]
pub struct PatternEngine {
    patterns: Vec<CompiledPattern>,
    reqs_per_pattern: u32,
    base_addr: u64,
}

impl PatternEngine {
    pub fn new(config: &TrafficConfig) -> Result<Self> {
        let reqs_per_pattern = config.reqs_per_pattern.max(1);
        let patterns = config
            .patterns
            .iter()
            .enumerate()
            .map(|(idx, spec)| compile_pattern(spec, idx, config, reqs_per_pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            reqs_per_pattern,
            base_addr: config.base_addr,
        })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn total_requests(&self) -> u64 {
        self.patterns.len() as u64 * self.reqs_per_pattern as u64
    }

    pub fn pattern(&self, idx: usize) -> Option<&CompiledPattern> {
        self.patterns.get(idx)
    }

    /// Highest byte address the stream can touch, exclusive.
    pub fn end_addr(&self) -> u64 {
        self.patterns
            .iter()
            .map(|p| self.base_addr.saturating_add(p.within_bytes))
            .max()
            .unwrap_or(self.base_addr)
    }

    /// Address and owning pattern of the `n`th load in the stream.
    pub fn request(&self, n: u64) -> Option<(u64, &CompiledPattern)> {
        let pattern_idx = usize::try_from(n / self.reqs_per_pattern as u64).ok()?;
        let req_idx = (n % self.reqs_per_pattern as u64) as u32;
        let pattern = self.patterns.get(pattern_idx)?;
        let offset = pattern.offset_bytes(req_idx) % pattern.within_bytes;
        Some((self.base_addr.saturating_add(offset), pattern))
    }
}

fn compile_pattern(
    spec: &TrafficPatternSpec,
    index: usize,
    config: &TrafficConfig,
    reqs_per_pattern: u32,
) -> Result<CompiledPattern> {
    let req_bytes = spec.req_bytes.max(1);
    if !req_bytes.is_power_of_two() {
        bail!(
            "traffic pattern {} uses {}-byte requests, expected a power of two",
            index,
            req_bytes
        );
    }
    let within_bytes = spec
        .within_bytes
        .unwrap_or(config.within_bytes)
        .max(req_bytes as u64);

    let kind_key = spec.kind.trim().to_ascii_lowercase();
    let kind = match kind_key.as_str() {
        "strided" => PatternKind::Strided {
            stride: spec.stride as u64,
        },
        "random" | "random_access" => {
            let min = spec.random_min as u64;
            let max = if spec.random_max == 0 {
                (within_bytes / req_bytes as u64).max(min + 1)
            } else {
                spec.random_max as u64
            };
            let max = max.max(min + 1);
            let mut rng = StdRng::seed_from_u64(spec.seed);
            let table = (0..reqs_per_pattern)
                .map(|_| rng.gen_range(min..max))
                .collect();
            PatternKind::Random { table }
        }
        other => bail!(
            "unsupported traffic pattern kind '{}' at index {} (expected strided|random)",
            other,
            index
        ),
    };

    let name = if spec.name.is_empty() {
        default_pattern_name(spec, &kind_key, req_bytes)
    } else {
        spec.name.clone()
    };

    Ok(CompiledPattern {
        name,
        req_bytes,
        prefetch_distance: spec.prefetch_distance,
        within_bytes,
        kind,
    })
}

fn default_pattern_name(spec: &TrafficPatternSpec, kind: &str, req_bytes: u32) -> String {
    match kind {
        "strided" => format!("strided({})@{}", spec.stride, req_bytes),
        _ => format!("random({})@{}", spec.seed, req_bytes),
    }
}
