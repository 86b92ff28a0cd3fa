// porter-aio/src/lib.rs
//! IO primitives for porter (filesystem, json, process, archives)

pub mod extract;
pub mod fs;
pub mod json_io;
pub mod process;

pub use extract::{extract_archive, list_archive};
pub use json_io::{read_json_opt, read_json_sync, write_json_sync};
pub use process::{run_collecting, run_command_async, CommandSpec, Finished, OutputCollector};
