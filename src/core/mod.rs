use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod config;

pub mod context;

pub mod fault;

pub mod item;

pub mod job;

pub mod listener;

pub mod partition;

pub mod pool;

pub mod repository;

pub mod step;

/// Generates a random name consisting of alphanumeric characters.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
