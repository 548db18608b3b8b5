use clap::Parser;
use tokio_util::sync::CancellationToken;

use args::Args;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_filter);

    if let Some(kind) = args.generate_key {
        let key = store::GeneratedKey::new(kind.into());
        // The plaintext is shown exactly once; only the hash is ever stored.
        println!("key:    {}", key.plaintext);
        println!("hash:   {}", key.hash);
        println!("prefix: {}", key.display_prefix);
        return Ok(());
    }

    let config = config::Config::load(&args.config)?;

    let listen_address = args
        .listen_address
        .unwrap_or_else(|| config.server.listen_address_or_default());

    let shutdown_signal = CancellationToken::new();

    tokio::spawn({
        let shutdown_signal = shutdown_signal.clone();

        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("received ctrl-c, shutting down");
                shutdown_signal.cancel();
            }
        }
    });

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
