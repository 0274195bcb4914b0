//! Cooperative runner for (task × model) benchmark comparisons.
//!
//! A fixed group of workers splits the cross product of tasks and models, elects one master per
//! task, runs an analysis and a post-processing phase separated by barriers and aggregates
//! runtimes and error flags on the reporting worker. Everything scientific happens behind the
//! [`confrontation::Confrontation`] trait.

pub mod config;
pub mod confrontation;
pub mod distributed;
pub mod driver;
pub mod executors;
pub mod logging;
pub mod models;
pub mod report;
pub mod runtime;
pub mod work;

#[cfg(test)]
mod runtime_test;
