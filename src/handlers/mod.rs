pub mod admin;
pub mod health;
pub mod history;
pub mod listen;
pub mod recommendations;
pub mod songs;

pub use admin::admin_config;
pub use health::{debug_info, health_check};
pub use history::history_config;
pub use listen::listen_config;
pub use recommendations::recommendations_config;
pub use songs::songs_config;
