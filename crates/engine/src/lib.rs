pub mod batch;
pub mod cell;
pub mod coord;
pub mod dep_index;
pub mod engine;
pub mod error;
pub mod formula;
pub mod label;
pub mod range;
pub mod reference;
