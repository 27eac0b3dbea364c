use std::sync::Arc;

use clap::Parser;
use hubwire::{
    Codec, CodecType, JsonCodec, MessagePackCodec, Router, RouterConfig, TcpTransport, Transport,
    TransportConfig, TransportType, WebSocketTransport,
};
use hubwire_demo::{CalculatorImpl, CalculatorService};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Listen address.
    #[arg(default_value = "0.0.0.0:8000")]
    pub addr: std::net::SocketAddr,

    /// Transport type.
    #[arg(long, default_value = "tcp")]
    pub transport: TransportType,

    /// Wire encoding.
    #[arg(long, default_value = "json")]
    pub codec: CodecType,
}

async fn serve<C: Codec>(transport: Arc<dyn Transport>, codec: C) -> hubwire::Result<()> {
    let router = Router::create(transport, codec, RouterConfig::default())?;
    router.add_service(CalculatorService::new(CalculatorImpl::default()), None)?;
    tracing::info!(
        "serving {:?} with {}...",
        router.hub_names(),
        router.codec().name()
    );

    let _ = tokio::signal::ctrl_c().await;
    router.dispose();
    router.join().await;
    Ok(())
}

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> hubwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = TransportConfig::default();
    let transport: Arc<dyn Transport> = match args.transport {
        TransportType::Tcp => TcpTransport::listen(args.addr, &config).await?,
        TransportType::WebSocket => WebSocketTransport::listen(args.addr, &config).await?,
    };

    let result = match args.codec {
        CodecType::Json => serve(transport.clone(), JsonCodec).await,
        CodecType::MessagePack => serve(transport.clone(), MessagePackCodec).await,
    };
    transport.close();
    result
}
