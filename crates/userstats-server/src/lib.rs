#![doc = include_str!("../README.md")]

pub mod config;
pub mod pool;
pub mod repository;
pub mod service;
pub mod signal;
pub mod telemetry;

#[cfg(test)]
mod testing;
