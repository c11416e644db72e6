// Configuration loading

pub mod settings;

pub use settings::{RecalcPolicy, Settings};
