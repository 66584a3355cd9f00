//! Agent 输出解析与过程事件：字面量解析器、ResponseParser、SessionEvent

pub mod events;
pub mod literal;
pub mod parser;

pub use events::SessionEvent;
pub use literal::{parse_call_arguments, parse_literal};
pub use parser::{ParseError, ParsedAction, ResponseParser, FENCE};
