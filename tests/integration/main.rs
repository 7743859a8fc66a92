//! Integration tests for the postcron binaries and the scheduled pipeline.

mod cli;
mod scheduled_pipeline;
