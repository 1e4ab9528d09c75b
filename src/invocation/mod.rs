//! Invocation Parser (C5): detects `<execute_skill>` blocks in a streamed
//! assistant response.

pub mod parser;

pub use parser::{Invocation, InvocationParser, ParseEvent, ParserError};
