pub mod arena;
pub mod backend;
pub mod dir;
pub mod engine;
pub mod names;
pub mod object;
pub mod parser;
pub mod pathtab;
