use std::sync::Arc;

use media_pacer::Session;
use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod media;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("media_pacer", log::LevelFilter::Debug)
        .filter_module("lite_ingress", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = config::config();
    let session = Arc::new(Session::new("ingress", config.pacer().clone())?);
    let ingress = media::ingress::Ingress::start(config, Arc::clone(&session))?;

    let cancel = CancellationToken::new();
    api::start_api_server(
        config.listen().to_string(),
        Arc::clone(&session),
        cancel.clone(),
    );

    tokio::select! {
        _ = session.wait_closed() => {},
        _ = tokio::signal::ctrl_c() => {
            log::info!("ctrl+c received, closing session");
            session.close();
        },
    }

    ingress.join().await;
    cancel.cancel();
    Ok(())
}
