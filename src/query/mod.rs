//! The query language and its translation into backend searches.

pub mod ast;
pub mod cursor;
pub mod geo;
pub mod parser;
pub mod request;
pub mod visitor;

pub use ast::{Literal, Operand, ParsedQuery, SortDirection, SortPredicate};
pub use cursor::{CursorManager, CursorRecord, CursorStore, MemoryCursorStore};
pub use parser::parse_query;
pub use request::SearchRequestBuilder;
pub use visitor::{translate, TranslatedQuery};
