mod fallback;
mod system;

pub use fallback::{NOT_FOUND_MESSAGE, not_found};
pub use system::{HEALTH_PATH, SERVICE_NAME, endpoint_map, health, root};
