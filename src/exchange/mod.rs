pub mod client;
pub mod provider;

pub use client::ExchangeClient;
pub use provider::Exchange;
