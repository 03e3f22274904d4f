//! Elitist truncation trainer driving generations of pit evaluations.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use slither_core::{GenerationReport, GenomeId, Network};

use crate::FeedForwardBrain;

/// Breeding knobs for [`EvoTrainer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainerConfig {
    /// Genomes per generation.
    pub population: usize,
    /// Fraction of the population kept verbatim as breeding stock.
    pub elite_fraction: f32,
    /// Per-parameter mutation probability for offspring.
    pub mutation_rate: f32,
    /// Standard deviation of mutation noise.
    pub mutation_scale: f32,
    /// Optional RNG seed for reproducible breeding.
    pub rng_seed: Option<u64>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            population: 16,
            elite_fraction: 0.25,
            mutation_rate: 0.1,
            mutation_scale: 0.3,
            rng_seed: None,
        }
    }
}

/// Aggregates from a single evaluated generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationStats {
    pub generation: u32,
    pub best_fitness: f32,
    pub mean_fitness: f32,
    pub best_score: u32,
    pub deaths: usize,
}

/// Final output of a training run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSummary {
    pub generations_run: u32,
    /// Brain implementation that was evolved, from [`Network::kind`].
    pub brain_kind: String,
    pub best_fitness: f32,
    pub best_score: u32,
    pub history: Vec<GenerationStats>,
}

/// Population holder that breeds a new generation from each evaluation.
///
/// Evaluation itself is a caller-supplied closure: the trainer hands out one
/// boxed [`Network`] per genome and consumes the resulting
/// [`GenerationReport`], so it stays ignorant of the game loop.
pub struct EvoTrainer {
    config: TrainerConfig,
    rng: SmallRng,
    population: Vec<(GenomeId, FeedForwardBrain)>,
    next_genome: u64,
}

impl EvoTrainer {
    /// Seed a trainer with a fresh random population.
    #[must_use]
    pub fn new(config: TrainerConfig) -> Self {
        let mut rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        };
        let mut population = Vec::with_capacity(config.population.max(1));
        let mut next_genome = 0u64;
        for _ in 0..config.population.max(1) {
            population.push((GenomeId(next_genome), FeedForwardBrain::random(&mut rng)));
            next_genome += 1;
        }
        Self {
            config,
            rng,
            population,
            next_genome,
        }
    }

    /// Current population size.
    #[must_use]
    pub fn population_len(&self) -> usize {
        self.population.len()
    }

    /// Boxed copies of the current population for one pit evaluation.
    #[must_use]
    pub fn spawn_generation(&self) -> Vec<(GenomeId, Box<dyn Network>)> {
        self.population
            .iter()
            .map(|(id, brain)| (*id, Box::new(brain.clone()) as Box<dyn Network>))
            .collect()
    }

    /// Run `generations` rounds of evaluate-then-breed.
    pub fn run<F>(&mut self, generations: u32, mut evaluate: F) -> TrainingSummary
    where
        F: FnMut(Vec<(GenomeId, Box<dyn Network>)>) -> GenerationReport,
    {
        let brain_kind = self
            .population
            .first()
            .map_or_else(String::new, |(_, brain)| brain.kind().to_string());
        let mut history = Vec::with_capacity(generations as usize);
        for generation in 0..generations {
            let report = evaluate(self.spawn_generation());
            let stats = self.breed(generation, &report);
            debug!(
                generation = stats.generation,
                brain = brain_kind.as_str(),
                best_fitness = stats.best_fitness,
                mean_fitness = stats.mean_fitness,
                best_score = stats.best_score,
                "generation bred"
            );
            history.push(stats);
        }
        let best_fitness = history
            .iter()
            .map(|stats| stats.best_fitness)
            .fold(f32::NEG_INFINITY, f32::max);
        let best_score = history.iter().map(|stats| stats.best_score).max();
        TrainingSummary {
            generations_run: generations,
            brain_kind,
            best_fitness,
            best_score: best_score.unwrap_or(0),
            history,
        }
    }

    /// Replace the population with elites plus mutated crossover offspring.
    fn breed(&mut self, generation: u32, report: &GenerationReport) -> GenerationStats {
        // Rank current genomes by reported fitness; genomes the report missed
        // (none in practice) sink to the bottom.
        let fitness_of = |id: GenomeId| {
            report
                .results
                .iter()
                .find(|(genome, _)| *genome == id)
                .map_or(f32::NEG_INFINITY, |(_, fitness)| *fitness)
        };
        self.population.sort_by(|(a, _), (b, _)| {
            fitness_of(*b)
                .partial_cmp(&fitness_of(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total: f32 = report.results.iter().map(|(_, fitness)| fitness).sum();
        let mean_fitness = if report.results.is_empty() {
            0.0
        } else {
            total / report.results.len() as f32
        };
        let best_fitness = self
            .population
            .first()
            .map_or(f32::NEG_INFINITY, |(id, _)| fitness_of(*id));

        let elites = ((self.population.len() as f32 * self.config.elite_fraction).ceil()
            as usize)
            .clamp(1, self.population.len());
        let target = self.population.len();

        let mut next = Vec::with_capacity(target);
        for (_, brain) in &self.population[..elites] {
            next.push((GenomeId(self.next_genome), brain.clone()));
            self.next_genome += 1;
        }
        while next.len() < target {
            let a = self.rng.random_range(0..elites);
            let b = self.rng.random_range(0..elites);
            let mut child = self.population[a].1.crossover(&self.population[b].1, &mut self.rng);
            child.mutate(
                &mut self.rng,
                self.config.mutation_rate,
                self.config.mutation_scale,
            );
            next.push((GenomeId(self.next_genome), child));
            self.next_genome += 1;
        }
        self.population = next;

        GenerationStats {
            generation,
            best_fitness,
            mean_fitness,
            best_score: report.best_score,
            deaths: report.deaths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slither_core::Tick;

    fn report_for(results: Vec<(GenomeId, f32)>) -> GenerationReport {
        let best_fitness = results
            .iter()
            .map(|(_, fitness)| *fitness)
            .fold(None, |acc: Option<f32>, f| {
                Some(acc.map_or(f, |best| best.max(f)))
            });
        GenerationReport {
            ticks: Tick(10),
            results,
            best_score: 2,
            best_fitness,
            deaths: 0,
        }
    }

    #[test]
    fn trainer_seeds_requested_population() {
        let trainer = EvoTrainer::new(TrainerConfig {
            population: 9,
            rng_seed: Some(1),
            ..TrainerConfig::default()
        });
        assert_eq!(trainer.population_len(), 9);
        let generation = trainer.spawn_generation();
        assert_eq!(generation.len(), 9);
        // Fresh genome ids are dense from zero.
        assert_eq!(generation[0].0, GenomeId(0));
        assert_eq!(generation[8].0, GenomeId(8));
    }

    #[test]
    fn breeding_preserves_population_size_and_refreshes_ids() {
        let mut trainer = EvoTrainer::new(TrainerConfig {
            population: 8,
            rng_seed: Some(2),
            ..TrainerConfig::default()
        });
        let ids: Vec<GenomeId> = trainer.spawn_generation().iter().map(|(id, _)| *id).collect();
        let summary = trainer.run(1, |generation| {
            report_for(
                generation
                    .iter()
                    .map(|(id, _)| (*id, id.0 as f32))
                    .collect(),
            )
        });
        assert_eq!(trainer.population_len(), 8);
        assert_eq!(summary.generations_run, 1);
        let new_ids: Vec<GenomeId> =
            trainer.spawn_generation().iter().map(|(id, _)| *id).collect();
        for id in &new_ids {
            assert!(!ids.contains(id), "bred genomes get fresh identities");
        }
    }

    #[test]
    fn elites_carry_best_brains_forward() {
        let mut trainer = EvoTrainer::new(TrainerConfig {
            population: 4,
            elite_fraction: 0.25,
            rng_seed: Some(3),
            ..TrainerConfig::default()
        });
        let best_brain = trainer.population[2].1.clone();
        let best_id = trainer.population[2].0;
        let results: Vec<(GenomeId, f32)> = trainer
            .population
            .iter()
            .map(|(id, _)| (*id, if *id == best_id { 100.0 } else { 1.0 }))
            .collect();
        trainer.run(1, move |_| report_for(results.clone()));
        // The single elite slot holds a verbatim copy of the winner.
        assert_eq!(trainer.population[0].1, best_brain);
    }

    #[test]
    fn summary_tracks_best_across_generations() {
        let mut trainer = EvoTrainer::new(TrainerConfig {
            population: 4,
            rng_seed: Some(4),
            ..TrainerConfig::default()
        });
        let mut round = 0u32;
        let summary = trainer.run(3, |generation| {
            round += 1;
            let peak = round as f32 * 10.0;
            report_for(generation.iter().map(|(id, _)| (*id, peak)).collect())
        });
        assert_eq!(summary.generations_run, 3);
        assert_eq!(summary.brain_kind, FeedForwardBrain::KIND);
        assert_eq!(summary.history.len(), 3);
        assert_eq!(summary.best_fitness, 30.0);
        assert_eq!(summary.best_score, 2);
    }
}
