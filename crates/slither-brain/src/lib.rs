//! Evolvable brains for slitherbots and the trainer that breeds them.
//!
//! The simulation core only knows the [`Network`](slither_core::Network)
//! trait; this crate provides the concrete feedforward implementation plus
//! the elitist truncation trainer that evaluates whole populations through a
//! caller-supplied closure.

pub mod feedforward;
pub mod trainer;

pub use feedforward::FeedForwardBrain;
pub use trainer::{EvoTrainer, GenerationStats, TrainerConfig, TrainingSummary};
