pub mod calculator;
pub mod network;
pub mod web_search;

pub use calculator::CalculatorCapability;
pub use network::HttpEndpointCapability;
pub use web_search::SearchCapability;
