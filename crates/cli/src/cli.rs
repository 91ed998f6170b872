use clap::{ArgGroup, Parser};
use std::path::PathBuf;

/// Run the QC pipeline of one use case
#[derive(Parser, Debug)]
#[command(name = "run_manager", version, about, long_about = None)]
#[command(group(ArgGroup::new("cleanup").args(["delete_job", "delete_log"])))]
pub struct Cli {
    /// Configuration fragments, merged left to right
    #[arg(
        short = 'c',
        long = "config",
        value_delimiter = ',',
        required_unless_present = "list_processors"
    )]
    pub config: Vec<PathBuf>,

    /// Stages to run, replacing the configured list
    #[arg(short = 'p', long = "processors", value_delimiter = ',')]
    pub processors: Option<Vec<String>>,

    /// List the registered processors and exit
    #[arg(short = 'l', long = "list-processors")]
    pub list_processors: bool,

    /// Re-run the unsuccessful stages of a prior job
    #[arg(long, value_name = "JOB_ID", conflicts_with = "processors")]
    pub resume: Option<i64>,

    /// Remove one job: its log entries, run log and output directory
    #[arg(long, value_name = "JOB_ID", conflicts_with_all = ["processors", "resume"])]
    pub delete_job: Option<i64>,

    /// Remove every job with all run logs and output directories
    #[arg(long, conflicts_with_all = ["processors", "resume"])]
    pub delete_log: bool,

    /// Also remove the working directory and the data downloaded into it
    #[arg(short = 'd', long, requires = "cleanup")]
    pub delete_data: bool,

    /// Only log warnings and do not print the document
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn is_cleanup(&self) -> bool {
        self.delete_job.is_some() || self.delete_log
    }
}
