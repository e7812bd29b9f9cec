//! Minimal CLI parsing for one-shot runs and task file overrides.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Run this task once and exit instead of starting the scheduler
    pub run_task: Option<String>,
    pub tasks_file: Option<PathBuf>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--run" => options.run_task = args.next(),
                "--tasks" => options.tasks_file = args.next().map(PathBuf::from),
                _ if arg.starts_with("--run=") => {
                    options.run_task = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ if arg.starts_with("--tasks=") => {
                    options.tasks_file = arg.split_once('=').map(|(_, v)| PathBuf::from(v));
                }
                _ => {}
            }
        }
        options
    }
}
