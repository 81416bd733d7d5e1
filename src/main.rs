use std::fs;
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swarmget::decode::decode;
use swarmget::download::download;
use swarmget::init::init;
use swarmget::metainfo::Metainfo;

#[derive(Parser)]
struct Cli {
    /// Filepath to metainfo (`.torrent`) file
    metainfo: PathBuf,

    /// Path to save the downloaded payload
    output: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let bytes = match fs::read(&cli.metainfo) {
        Err(e) => {
            eprintln!("Unable to read metainfo file {:?}: {}", cli.metainfo, e);
            exit(1);
        }
        Ok(val) => val,
    };

    let (bencoded, _) = match decode(&bytes) {
        Err(e) => {
            eprintln!("Unable to decode metainfo file {:?}: {}", cli.metainfo, e);
            exit(1);
        }
        Ok(val) => val,
    };
    let metainfo = match Metainfo::new(bencoded) {
        Err(e) => {
            eprintln!("Invalid metainfo file {:?}: {}", cli.metainfo, e);
            exit(1);
        }
        Ok(val) => val,
    };

    let torrent = match init(metainfo).await {
        Err(e) => {
            eprintln!("Tracker announce failed: {}", e);
            exit(1);
        }
        Ok(val) => val,
    };
    let payload = match download(torrent).await {
        Err(e) => {
            eprintln!("Download failed: {}", e);
            exit(1);
        }
        Ok(val) => val,
    };

    if let Err(e) = fs::write(&cli.output, &payload) {
        eprintln!("Unable to save payload to {:?}: {}", cli.output, e);
        exit(1);
    }
}
