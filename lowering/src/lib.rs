// gtc — Graph Transfer Compiler
//
// Library root. Lowers dataflow compute graphs into the flat transfer-table
// IR consumed by the SoC accelerator loader.

pub mod dryrun;
pub mod dump;
pub mod error;
pub mod graph;
pub mod lower;
pub mod registry;
pub mod shape;
pub mod tensor;
pub mod transfer;
