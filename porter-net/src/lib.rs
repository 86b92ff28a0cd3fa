// porter-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{FetchRequest, Fetcher, HttpFetcher};
pub use validation::{is_network_error, validate_url};
