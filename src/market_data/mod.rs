pub mod generator;
pub mod period;

pub use generator::{GeneratorConfig, PriceGenerator};
pub use period::CandlePeriod;
