// cipherbench — benchmarking harness for homomorphic-encryption backends
//
// Library root. The binary wires CLI, config, and signal handling around
// the engine.

pub mod abi;
pub mod bench;
pub mod config;
pub mod datagen;
pub mod engine;
pub mod error;
pub mod latency;
pub mod matcher;
pub mod offline;
pub mod pack;
pub mod path;
pub mod report;
pub mod validate;
pub mod workload;
