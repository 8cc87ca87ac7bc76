pub mod framework;
pub mod language;

pub use framework::TestFramework;
pub use language::Language;
