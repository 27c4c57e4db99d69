pub mod configuration;

pub use configuration::{Command, init_logger, load_configuration};
