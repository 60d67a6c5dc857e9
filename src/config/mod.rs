pub mod sender_configuration;
pub mod settings;

pub use sender_configuration::{SenderConfiguration, SenderConfigurationRegistry};
pub use settings::PushServerConfig;
