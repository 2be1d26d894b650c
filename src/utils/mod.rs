pub mod logging;

pub use logging::{init_logging, install_panic_hook};
