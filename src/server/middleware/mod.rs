mod ip_extractor;
mod rate_limit;

pub use ip_extractor::{extract_client_ip, ClientIp};
pub use rate_limit::rate_limit_middleware;
