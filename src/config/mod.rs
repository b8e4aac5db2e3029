/// Database configuration and connection management
pub mod database;

/// Engine settings loaded from payroll.toml
pub mod settings;

pub use settings::Settings;
