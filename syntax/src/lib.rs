pub mod reader;
pub mod scopes;
pub mod syntax;

pub use reader::{read_all, read_module, ReadError, Reader, SourceModule};
pub use scopes::{Scope, ScopeSet};
pub use syntax::{Ident, SrcLoc, Syntax, SyntaxKind};
