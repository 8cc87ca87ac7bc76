pub mod coverage;
pub mod file;
pub mod report;
pub mod validate;

pub use report::{RunReport, REPORT_FILE};
pub use validate::AcceptancePolicy;
