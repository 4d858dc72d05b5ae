//! Hydrogen Compiler
//!
//! Lexes and parses Hydrogen source directly into the bytecode form defined
//! in `hydrogen-core`: there is no intermediate AST, and nothing here
//! executes anything — that's `hydrogen-runtime`'s job.
//!
//! ```rust,ignore
//! use hydrogen_compiler::{compile_package, import::FsLoader};
//! use hydrogen_core::Program;
//!
//! let mut program = Program::new();
//! let mut loader = FsLoader { base_dir: "scripts".into() };
//! let source = std::fs::read_to_string("scripts/main.hy")?;
//! let package = compile_package(&mut program, &mut loader, None, Some("main.hy".into()), source)?;
//! ```

pub mod import;
pub mod lexer;
pub mod parser;
pub mod token;

pub use import::{package_name, validate_path, FsLoader, SourceLoader};
pub use lexer::Lexer;
pub use parser::{compile_package, Parser};
pub use token::{Token, TokenType};
