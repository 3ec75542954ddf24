pub mod exclusion_engine;
pub mod stress;
pub mod var;
