//! Load generator interface
//!
//! Command construction for, and result parsing from, the external load
//! generator process.

mod command;
mod parser;

pub use command::{LoadCommand, LocustCommandBuilder};
pub use parser::{ResultParser, ResultRecord};
