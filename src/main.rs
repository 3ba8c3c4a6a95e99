use bulle_cli::{run_with_args, Args};
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    run_with_args(args)
}
