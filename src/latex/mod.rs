//! LaTeX fragment model and parser.
//!
//! [`parser::parse`] turns one file's text into a `Vec<Fragment>`;
//! [`fragment::render`] turns it back, byte for byte.

pub mod fragment;
pub mod parser;

pub use fragment::{
    render, visit, Argument, DocumentNode, EnvironmentBlock, Fragment, IncludeDirective,
    IncludeKind, MacroInvocation, MathSpan, NormalizedDocument,
};
pub use parser::{parse, parse_math_content, MAX_NESTING};
