use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use hubwire::{
    Codec, CodecType, Interface, JsonCodec, MessagePackCodec, Router, RouterConfig, TcpTransport,
    Transport, TransportConfig, TransportType, WebSocketTransport,
};
use hubwire_demo::{Calculator, CalculatorClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Server address.
    #[arg(default_value = "127.0.0.1:8000")]
    pub addr: std::net::SocketAddr,

    /// Transport type.
    #[arg(long, default_value = "tcp")]
    pub transport: TransportType,

    /// Wire encoding.
    #[arg(long, default_value = "json")]
    pub codec: CodecType,

    /// Name to greet.
    #[arg(short, long, default_value = "alice")]
    pub value: String,

    /// Call timeout in seconds.
    #[arg(long, default_value = "5")]
    pub timeout_secs: u64,

    /// Enable stress testing.
    #[arg(long, default_value_t = false)]
    pub stress: bool,

    /// Stress testing duration.
    #[arg(long, default_value = "60")]
    pub secs: u64,

    /// The number of concurrent callers.
    #[arg(long, default_value = "32")]
    pub coroutines: usize,
}

#[derive(Default)]
struct State {
    total: AtomicUsize,
    fails: AtomicUsize,
}

async fn stress_test<C: Codec>(args: &Args, calculator: CalculatorClient<C>) {
    let state = Arc::new(State::default());
    let start_time = std::time::Instant::now();
    let mut tasks = vec![];
    for i in 0..args.coroutines {
        let state = state.clone();
        let calculator = calculator.clone();
        let secs = args.secs;
        tasks.push(tokio::spawn(async move {
            let a = i64::try_from(i).unwrap_or_default();
            while start_time.elapsed().as_secs() < secs {
                for b in 0..256 {
                    let result = calculator.add(a, b).await;
                    state.total.fetch_add(1, Ordering::AcqRel);
                    if result != Ok(a + b) {
                        state.fails.fetch_add(1, Ordering::AcqRel);
                    }
                }
            }
        }));
    }
    tokio::select! {
        _ = async {
            for task in tasks {
                let _ = task.await;
            }
        } => {
        }
        _ = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let total = state.total.swap(0, Ordering::AcqRel);
                let fails = state.fails.swap(0, Ordering::AcqRel);
                tracing::info!("QPS: {total}/s, fails: {fails}/s");
            }
        } => {
        }
    }
}

async fn run<C: Codec>(
    args: &Args,
    transport: Arc<dyn Transport>,
    codec: C,
) -> hubwire::Result<()> {
    let config = RouterConfig {
        call_timeout: Some(Duration::from_secs(args.timeout_secs)),
    };
    let router = Router::create(transport, codec, config)?;
    let calculator = router.add_interface::<CalculatorClient<C>>(None)?;
    tracing::info!(
        "calling {} with {}",
        <CalculatorClient<C> as Interface<C>>::NAME,
        router.codec().name()
    );

    if args.stress {
        stress_test(args, calculator).await;
    } else {
        tracing::info!("add rsp: {:?}", calculator.add(3, 4).await);
        tracing::info!("divide rsp: {:?}", calculator.divide(1.0, 0.0).await);
        tracing::info!("greet rsp: {:?}", calculator.greet(&args.value).await);
        tracing::info!("stats rsp: {:?}", calculator.stats().await);
    }

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
        TransportType::Tcp => TcpTransport::connect(args.addr, &config).await?,
        TransportType::WebSocket => {
            WebSocketTransport::connect(&format!("ws://{}", args.addr), &config).await?
        }
    };

    let result = match args.codec {
        CodecType::Json => run(&args, transport.clone(), JsonCodec).await,
        CodecType::MessagePack => run(&args, transport.clone(), MessagePackCodec).await,
    };
    transport.close();
    result
}
