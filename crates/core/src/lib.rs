pub mod agent;
pub mod arm;
pub mod assistant;
pub mod clicker;
pub mod console;
pub mod cycle;
pub mod error;
pub mod logger;
pub mod macros;
#[cfg(feature = "ocr")]
pub mod ocr;
pub mod platform;
pub mod screenshot;
pub mod settings;
pub mod sleep;
pub mod state;
pub mod types;
pub mod vision;
