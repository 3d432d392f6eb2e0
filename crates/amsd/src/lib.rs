pub mod api;
pub mod config;
pub mod engine;
pub mod entries;
pub mod flow;
pub mod integrations;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::Event;
pub use engine::State;
pub use entries::ConfigEntry;
pub use entries::EntryStore;
