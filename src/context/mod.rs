pub mod extract;
pub mod imports;
pub mod lexer;
pub mod types;

pub use extract::extract;
pub use imports::{resolve_imports, ImportResolver};
pub use types::{ImportSet, MethodSignature, SourceUnit};
