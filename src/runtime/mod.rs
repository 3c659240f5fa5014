pub mod boot;

pub use boot::{boot, init_logging, run};
