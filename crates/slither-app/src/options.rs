//! Persistent run options, stored as a small JSON record next to the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Record persisted between runs: the all-time high score plus the training
/// shape last used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Options {
    pub high_score: u32,
    pub generations: u32,
    pub population: usize,
    pub grid_view: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            high_score: 0,
            generations: 1000,
            population: 16,
            grid_view: false,
        }
    }
}

impl Options {
    /// Load options from `path`, falling back to defaults when the file does
    /// not exist yet. A malformed file is an error rather than silent reset.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading options from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing options in {}", path.display()))
    }

    /// Load options, replacing a missing or unreadable file with defaults
    /// that are written back out right away, so the record on disk is always
    /// valid afterward. Returns the options and whether a reset happened.
    pub fn load_or_reset(path: &Path) -> Result<(Self, bool)> {
        match Self::load(path) {
            Ok(options) if path.exists() => Ok((options, false)),
            Ok(defaults) => {
                defaults.save(path)?;
                Ok((defaults, true))
            }
            Err(_) => {
                let defaults = Self::default();
                defaults.save(path)?;
                Ok((defaults, true))
            }
        }
    }

    /// Persist options to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .with_context(|| format!("writing options to {}", path.display()))
    }

    /// Correct unusable values to the nearest workable ones instead of
    /// refusing to run: a pit needs at least two genomes to breed from, and a
    /// training run needs at least one generation. Returns true when anything
    /// was corrected.
    pub fn sanitize(&mut self) -> bool {
        let mut corrected = false;
        if self.population < 2 {
            self.population = 2;
            corrected = true;
        }
        if self.generations < 1 {
            self.generations = 1;
            corrected = true;
        }
        corrected
    }

    /// Record a candidate high score; returns true when it beat the record.
    pub fn record_score(&mut self, score: u32) -> bool {
        if score > self.high_score {
            self.high_score = score;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("slitherbots-{}-{}.json", name, std::process::id()));
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = scratch_path("missing");
        let _ = fs::remove_file(&path);
        let options = Options::load(&path).expect("load");
        assert_eq!(options, Options::default());
        assert_eq!(options.generations, 1000);
        assert_eq!(options.population, 16);
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = scratch_path("roundtrip");
        let mut options = Options::default();
        options.high_score = 12;
        options.grid_view = true;
        options.save(&path).expect("save");
        let loaded = Options::load(&path).expect("load");
        assert_eq!(loaded, options);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn record_score_only_moves_upward() {
        let mut options = Options::default();
        assert!(options.record_score(5));
        assert!(!options.record_score(5));
        assert!(!options.record_score(3));
        assert_eq!(options.high_score, 5);
        assert!(options.record_score(6));
    }

    #[test]
    fn sanitize_raises_counts_to_minimums() {
        let mut options = Options {
            population: 0,
            generations: 0,
            ..Options::default()
        };
        assert!(options.sanitize());
        assert_eq!(options.population, 2);
        assert_eq!(options.generations, 1);
        assert!(!options.sanitize());
    }

    #[test]
    fn sanitize_bumps_single_genome_population() {
        let mut options = Options {
            population: 1,
            ..Options::default()
        };
        assert!(options.sanitize());
        assert_eq!(options.population, 2);
        assert_eq!(options.generations, 1000);
    }

    #[test]
    fn sanitize_leaves_workable_values_alone() {
        let mut options = Options::default();
        assert!(!options.sanitize());
        assert_eq!(options, Options::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = scratch_path("malformed");
        fs::write(&path, "not json").expect("write");
        assert!(Options::load(&path).is_err());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reset_persists_defaults_immediately() {
        let path = scratch_path("reset");
        fs::write(&path, "not json").expect("write");
        let (options, reset) = Options::load_or_reset(&path).expect("load_or_reset");
        assert!(reset);
        assert_eq!(options, Options::default());
        // The file on disk was repaired before anything else ran.
        assert_eq!(Options::load(&path).expect("reload"), Options::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_reseeded_on_disk() {
        let path = scratch_path("reseed");
        let _ = fs::remove_file(&path);
        let (options, reset) = Options::load_or_reset(&path).expect("load_or_reset");
        assert!(reset);
        assert_eq!(options, Options::default());
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn intact_file_is_not_reset() {
        let path = scratch_path("intact");
        let mut saved = Options::default();
        saved.high_score = 9;
        saved.save(&path).expect("save");
        let (options, reset) = Options::load_or_reset(&path).expect("load_or_reset");
        assert!(!reset);
        assert_eq!(options, saved);
        let _ = fs::remove_file(&path);
    }
}
