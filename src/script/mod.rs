//! The workflow scripting language: lexer, parser, interpreter and the
//! host modules scripts can import.

pub mod ast;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod loader;
pub mod object;
pub mod parser;
pub mod stdlib;
pub mod unparse;

pub use error::{ErrorKind, Frame, ScriptError};
pub use interp::{CallHook, Host, Interpreter, SourceLoader, StdHost, HOOK_NAME};
pub use loader::{CodeDir, EntryPoint, LoadError};
pub use object::{Args, CallTarget, Object};
pub use parser::{parse_module, ParseError};
