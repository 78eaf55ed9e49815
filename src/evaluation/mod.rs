//! Evaluation of the trained model

pub mod evaluator;

pub use evaluator::{evaluate, save_score, score_model, Evaluation, ModelScore, ScoreRecord};
