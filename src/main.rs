//! CLI entry point for neural style transfer

use clap::Parser;
use neuralstyle::io::cli::{Cli, StyleProcessor};

fn main() -> neuralstyle::Result<()> {
    let cli = Cli::parse();
    let mut processor = StyleProcessor::new(cli);
    processor.process()
}
