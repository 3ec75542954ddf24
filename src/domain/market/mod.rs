pub mod types;

pub use types::{MarketSample, SentimentSample};
