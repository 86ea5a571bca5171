use std::{
    fs::File,
    io::{stdin, BufReader, Read},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;

use tar_restore::{extract_with_options, ExtractOptions};

/// Extract a tar archive, restoring ownership, permissions and timestamps
#[derive(Debug, Parser)]
#[clap(name = "tar-restore", version)]
pub struct App {
    /// the archive to read, or "-" for stdin
    #[clap(short = 'f', long = "file", default_value = "-")]
    archive: String,
    /// always use the numeric owner and group ids, ignoring user and group names
    #[clap(long)]
    numeric_owner: bool,
    /// the directory to extract into
    target: PathBuf,
}

fn open_archive(name: &str) -> Result<Box<dyn Read>> {
    if name == "-" {
        return Ok(Box::new(stdin().lock()));
    }
    let file = File::open(name).with_context(|| format!("opening archive {name:?}"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    let options = ExtractOptions {
        numeric_owner: args.numeric_owner,
    };
    let archive = open_archive(&args.archive)?;

    extract_with_options(archive, &args.target, &options)
        .with_context(|| format!("extracting into {:?}", args.target))?;

    Ok(())
}
