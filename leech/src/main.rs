use std::{path::PathBuf, time::Duration};
use clap::Parser;
use leech::{start_download, Config, MetaInfo, Status};

#[derive(Parser)]
#[command(about = "Download a torrent")]
struct Args {
    #[arg(help = "Path to torrent file")]
    torrent: PathBuf,

    #[arg(short, long, default_value = ".", help = "Directory to save into")]
    out: PathBuf,

    #[arg(long, help = "Give up on a peer after this many failed reconnects")]
    max_reconnects: Option<u32>,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {

    let args = Args::parse();

    // Set up logging.
    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub)?;

    let metadata = MetaInfo::new(&args.torrent)
        .map_err(|e| {
            println!("failed to parse metainfo");
            e
        })?
        .into_metadata();

    let config = Config { max_reconnects: args.max_reconnects, ..Default::default() };
    let handle = start_download(metadata, args.out, config);

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = tokio::signal::ctrl_c() => {
                println!("interrupted");
                break;
            },
        }

        let snapshot = handle.snapshot();
        println!(
            "{} {:.1}% {}/{} peers",
            snapshot.status,
            snapshot.progress,
            snapshot.connected_peers,
            snapshot.total_peers,
        );
        match snapshot.status {
            Status::Complete => {
                println!("{} complete", snapshot.name);
                break;
            },
            Status::NoPeers => {
                println!("no peers found");
                break;
            },
            _ if handle.is_finished() => {
                println!("all peers lost");
                break;
            },
            _ => {},
        }
    }

    handle.shutdown().await?;
    Ok(())
}
