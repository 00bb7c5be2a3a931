// Density-layered rhythm patterns.
//
// A pattern is an always-audible base grid plus an ordered list of layers.
// Each grid is per-voice: 16 sixteenth-note slots holding a velocity, 0 for
// silence. Layers are sorted by threshold. Given a density in [0, 1]:
//
//   - the base is copied unchanged;
//   - each layer with `density >= threshold` is active, with
//     `progress = clamp((density - threshold) / (next - threshold), 0, 1)`,
//     where `next` is the following layer's threshold (1.0 after the last;
//     a non-positive span counts as full progress);
//   - every slot an active layer defines sounds with probability `progress`,
//     rolled fresh on every generation.
//
// A voice that only appears in a layer is created, silent, the first time
// that layer is active. With every threshold above zero, density 0 therefore
// yields exactly the base.
//
// Grids are written as 16-character strings (see `parse_grid`) so pattern
// tables read like a drum machine's step display.
//
// Shared by drummer.rs and bassist.rs, which supply their own voice types.

use crate::clock::STEPS_PER_BAR;
use std::collections::BTreeMap;
use whip_prng::EngineRng;

/// Velocity per sixteenth slot; 0 is a rest.
pub type VoiceGrid = [u8; STEPS_PER_BAR];

pub const ACCENT_VELOCITY: u8 = 112;
pub const NORMAL_VELOCITY: u8 = 92;
pub const SOFT_VELOCITY: u8 = 68;
pub const GHOST_HIT_VELOCITY: u8 = 38;

/// Parse a step string: `X` accent, `x` normal, `o` soft, `g` ghost, anything
/// else a rest. Characters past 16 are ignored; short strings are padded
/// with rests.
pub fn parse_grid(steps: &str) -> VoiceGrid {
    let mut grid = [0u8; STEPS_PER_BAR];
    for (slot, c) in grid.iter_mut().zip(steps.chars()) {
        *slot = match c {
            'X' => ACCENT_VELOCITY,
            'x' => NORMAL_VELOCITY,
            'o' => SOFT_VELOCITY,
            'g' => GHOST_HIT_VELOCITY,
            _ => 0,
        };
    }
    grid
}

/// Build a voice map from `(voice, steps)` pairs.
pub fn voices<V: Ord + Copy>(rows: &[(V, &str)]) -> BTreeMap<V, VoiceGrid> {
    rows.iter().map(|&(v, s)| (v, parse_grid(s))).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityLayer<V: Ord + Copy> {
    pub threshold: f64,
    pub hits: BTreeMap<V, VoiceGrid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityPattern<V: Ord + Copy> {
    pub base: BTreeMap<V, VoiceGrid>,
    /// Sorted by ascending threshold.
    layers: Vec<DensityLayer<V>>,
}

impl<V: Ord + Copy> DensityPattern<V> {
    pub fn new(base: BTreeMap<V, VoiceGrid>) -> Self {
        DensityPattern {
            base,
            layers: Vec::new(),
        }
    }

    /// Add a layer, keeping layers sorted by threshold.
    pub fn with_layer(mut self, threshold: f64, hits: BTreeMap<V, VoiceGrid>) -> Self {
        let threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.layers.push(DensityLayer { threshold, hits });
        self.layers.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
        self
    }

    pub fn layers(&self) -> &[DensityLayer<V>] {
        &self.layers
    }

    /// Activation progress of layer `index` at `density`, or `None` while
    /// the layer is inactive.
    pub fn layer_progress(&self, index: usize, density: f64) -> Option<f64> {
        let layer = self.layers.get(index)?;
        if density < layer.threshold {
            return None;
        }
        let next = self.layers.get(index + 1).map_or(1.0, |l| l.threshold);
        let span = next - layer.threshold;
        if span <= 0.0 {
            return Some(1.0);
        }
        Some(((density - layer.threshold) / span).clamp(0.0, 1.0))
    }

    /// Synthesize a concrete grid at `density`.
    pub fn generate(&self, density: f64, rng: &mut EngineRng) -> PatternGrid<V> {
        let density = clamp_density(density);
        let mut voices = self.base.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let Some(progress) = self.layer_progress(i, density) else {
                break;
            };
            for (&voice, hits) in &layer.hits {
                let grid = voices.entry(voice).or_insert([0; STEPS_PER_BAR]);
                for (slot, &velocity) in grid.iter_mut().zip(hits.iter()) {
                    if velocity > 0 && rng.random_bool(progress) {
                        *slot = (*slot).max(velocity);
                    }
                }
            }
        }
        PatternGrid { voices }
    }

    /// Expected number of sounding slots at `density`. Non-decreasing in
    /// density.
    pub fn expected_hits(&self, density: f64) -> f64 {
        let density = clamp_density(density);
        // Probability each (voice, slot) stays silent.
        let mut silent: BTreeMap<(V, usize), f64> = BTreeMap::new();
        for (&voice, grid) in &self.base {
            for (slot, &v) in grid.iter().enumerate() {
                if v > 0 {
                    silent.insert((voice, slot), 0.0);
                }
            }
        }
        for (i, layer) in self.layers.iter().enumerate() {
            let Some(progress) = self.layer_progress(i, density) else {
                break;
            };
            for (&voice, grid) in &layer.hits {
                for (slot, &v) in grid.iter().enumerate() {
                    if v > 0 {
                        let p = silent.entry((voice, slot)).or_insert(1.0);
                        *p *= 1.0 - progress;
                    }
                }
            }
        }
        silent.values().map(|p| 1.0 - p).sum()
    }
}

fn clamp_density(density: f64) -> f64 {
    if density.is_finite() {
        density.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A synthesized per-voice grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternGrid<V: Ord + Copy> {
    voices: BTreeMap<V, VoiceGrid>,
}

impl<V: Ord + Copy> Default for PatternGrid<V> {
    fn default() -> Self {
        PatternGrid {
            voices: BTreeMap::new(),
        }
    }
}

impl<V: Ord + Copy> PatternGrid<V> {
    pub fn from_voices(voices: BTreeMap<V, VoiceGrid>) -> Self {
        PatternGrid { voices }
    }

    pub fn voice(&self, voice: V) -> Option<&VoiceGrid> {
        self.voices.get(&voice)
    }

    pub fn voice_ids(&self) -> impl Iterator<Item = V> + '_ {
        self.voices.keys().copied()
    }

    /// `(voice, velocity)` for every voice sounding on `step`.
    pub fn hits_at(&self, step: usize) -> Vec<(V, u8)> {
        self.voices
            .iter()
            .filter_map(|(&v, grid)| grid.get(step).filter(|&&vel| vel > 0).map(|&vel| (v, vel)))
            .collect()
    }

    pub fn hit_count(&self) -> usize {
        self.voices
            .values()
            .map(|g| g.iter().filter(|&&v| v > 0).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum V {
        A,
        B,
        C,
    }

    fn pattern() -> DensityPattern<V> {
        DensityPattern::new(voices(&[(V::A, "x...x...x...x...")]))
            .with_layer(0.6, voices(&[(V::A, "..x...x...x...x."), (V::C, "X")]))
            .with_layer(0.3, voices(&[(V::B, "....x.......x...")]))
    }

    #[test]
    fn parse_grid_symbols() {
        let g = parse_grid("Xxog.");
        assert_eq!(&g[..5], &[ACCENT_VELOCITY, NORMAL_VELOCITY, SOFT_VELOCITY, GHOST_HIT_VELOCITY, 0]);
        assert!(g[5..].iter().all(|&v| v == 0));
    }

    #[test]
    fn layers_sorted_and_progress() {
        let p = pattern();
        assert_eq!(p.layers()[0].threshold, 0.3);
        assert_eq!(p.layer_progress(0, 0.2), None);
        assert!((p.layer_progress(0, 0.45).unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(p.layer_progress(0, 0.9), Some(1.0));
        assert!((p.layer_progress(1, 0.8).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_density_is_exactly_base() {
        let p = pattern();
        let mut rng = EngineRng::new(1);
        let grid = p.generate(0.0, &mut rng);
        assert_eq!(grid, PatternGrid::from_voices(p.base.clone()));
        assert!(grid.voice(V::B).is_none());
    }

    #[test]
    fn full_density_activates_everything() {
        let p = pattern();
        let mut rng = EngineRng::new(2);
        let grid = p.generate(1.0, &mut rng);
        assert_eq!(grid.hit_count(), 4 + 4 + 2 + 1);
        assert_eq!(grid.hits_at(0), vec![(V::A, NORMAL_VELOCITY), (V::C, ACCENT_VELOCITY)]);
    }

    #[test]
    fn layer_voice_created_silent_at_threshold() {
        let p = pattern();
        let mut rng = EngineRng::new(3);
        let grid = p.generate(0.3, &mut rng);
        assert_eq!(grid.voice(V::B), Some(&[0; STEPS_PER_BAR]));
    }

    #[test]
    fn expected_hits_monotonic() {
        let p = pattern();
        let mut prev = p.expected_hits(0.0);
        assert_eq!(prev, 4.0);
        for i in 1..=100 {
            let e = p.expected_hits(i as f64 / 100.0);
            assert!(e + 1e-9 >= prev);
            prev = e;
        }
        assert!((prev - 11.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_pattern() {
        let p = pattern();
        let a = p.generate(0.5, &mut EngineRng::new(7));
        let b = p.generate(0.5, &mut EngineRng::new(7));
        assert_eq!(a, b);
    }
}
