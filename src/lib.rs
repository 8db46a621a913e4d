//! A pipeline step chainer.
//!
//! A chainer wires a single step of an inference pipeline onto a broker: it consumes the step's
//! input topic, keeps only the records of its pipeline, converts model responses into requests
//! for the next model where the step bridges two models, gates emission on the step's trigger
//! topics, and publishes what remains to the step's output topic.

pub mod app;
pub mod broker;
pub mod chainer;
pub mod codec;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod join;
pub mod models;
pub mod server;
pub mod topology;
pub mod utils;
