use clap::Parser;

fn main() {
    let args = pl_server::Args::parse();

    if let Err(error) = pl_server::init_logging(&args.log) {
        eprintln!("failed to initialize logging: {error:#}");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build();

    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "couldn't build Tokio runtime");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(pl_server::run(args));

    // Don't wait on blocking tasks, such as sessions which didn't drain.
    runtime.shutdown_background();

    if let Err(error) = result {
        tracing::error!(error = format!("{error:#}"), "plsd crashed with error");
        std::process::exit(1);
    }
    tracing::info!("plsd exiting");
}
