pub mod accumulator;
pub mod event;
pub mod normalize;

pub use accumulator::{JsonAccumulator, ParseOutcome};
pub use event::CanonicalEvent;
pub use normalize::normalize;
