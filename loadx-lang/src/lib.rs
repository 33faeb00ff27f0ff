//! Scenario-language front end: lexing, parsing, curl translation, and
//! compilation down to a [`loadx_ir::ScenarioPlan`].
//!
//! ```
//! let source = r#"
//! request hello {
//!     curl https://example.invalid/ok
//!     assert status == 200
//! }
//!
//! scenario smoke {
//!     load 1 vus for 1s
//!     run hello
//! }
//! "#;
//!
//! let plan = loadx_lang::compile_source(source, None).unwrap();
//! assert_eq!(plan.name, "smoke");
//! ```

pub mod ast;
pub mod curl;
pub mod lexer;
pub mod parser;
pub mod token;

mod compile;
mod error;

pub use compile::{BUILTIN_VARS, compile, compile_source, is_builtin, scenario_names};
pub use error::{Error, ParseError, Result, parse_duration};
pub use parser::Parser;
