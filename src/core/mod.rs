//! Declaration pipeline: types, parsing and builders, resolution, compilation, validation, execution.

pub mod builder;
pub mod compiler;
pub mod executor;
pub mod io;
pub mod params;
pub mod parser;
pub mod prompt;
pub mod resolver;
pub mod rules;
pub mod types;
pub mod validator;
