use clap::Parser;
use flow_cli_common::{init_logging, OrBail};

fn main() {
    let args = chord_node::Args::parse();
    init_logging(&args.log);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .or_bail("failed to start the tokio runtime");

    runtime
        .block_on(chord_node::startup::run(args))
        .or_bail("chord node exited with an error");
}
