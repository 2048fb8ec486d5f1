pub mod clock;
pub mod config;

pub use clock::now_secs;
pub use config::FrontgridConfig;
