mod device;
mod engine;
mod entity;
mod event;
mod integration;
mod message;
pub mod state;

pub use device::Device;
pub use engine::Engine;
pub use engine::EngineError;
pub use entity::Entity;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::EntityHandle;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::Notification;
pub use state::State;
pub use state::SwitchState;
