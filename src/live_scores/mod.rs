pub mod http;
pub mod provider;

pub use http::HttpMatchFeed;
pub use provider::MatchFeed;
