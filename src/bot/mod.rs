pub mod cadence;
pub mod clock;
pub mod decision;
pub mod discard;
pub mod engine;
pub mod ladder;
pub mod qualification;
pub mod record;
pub mod stake;
pub mod tracker;

pub use engine::BotEngine;
