//! Image Reassembler - push S3-exported container images to a registry

use image_reassembler::cli::{AssembleConfig, Cli, Command, Runner};
use image_reassembler::error::ReassemblerError;
use image_reassembler::logging::Logger;
use std::process;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let config = match &cli.command {
        Command::Assemble(args) => AssembleConfig::from_args(&cli, args).from_env(),
    };

    let runner = match Runner::new(config, cancel) {
        Ok(runner) => runner,
        Err(e) => {
            Logger::new(false).error(&format!("{}", e));
            if matches!(e, ReassemblerError::Validation(_)) {
                eprintln!();
                Cli::print_examples();
            }
            process::exit(1);
        }
    };

    if let Err(e) = runner.run().await {
        runner.output().error(&format!("{}", e));
        process::exit(match e {
            ReassemblerError::Cancelled => 130,
            _ => 1,
        });
    }
}
