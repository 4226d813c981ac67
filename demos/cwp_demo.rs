use cwp_client::{ClientConfig, CwpClient, Event, EventSink};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Prints every event the client reports
struct PrintSink;

impl EventSink for PrintSink {
    fn on_event(&self, event: Event) {
        println!("event: {}", event);
    }
}

/// Minimal stand-in for a CWP server: confirms the first frequency it is
/// sent, then keys the line once for 300 ms.
async fn run_local_peer(listener: TcpListener) -> std::io::Result<()> {
    let (mut stream, _) = listener.accept().await?;

    let frequency = stream.read_i32().await?;
    stream.write_i32(frequency).await?;

    sleep(Duration::from_millis(200)).await;
    stream.write_i32(1_000).await?;
    sleep(Duration::from_millis(300)).await;
    stream.write_i16(300).await?;

    // Print whatever the client keys from here on.
    loop {
        let value = stream.read_i32().await?;
        println!("peer: line up at {} ms", value);
        let held = stream.read_i16().await?;
        println!("peer: line down after {} ms", held);
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[tokio::main]
async fn main() -> cwp_client::Result<()> {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(run_local_peer(listener));

    let config = ClientConfig {
        port,
        frequency: 440,
        ..Default::default()
    };
    println!("Connecting to {} at {} Hz", config.endpoint(), config.frequency);

    let mut client = CwpClient::new(config, PrintSink)?;
    client.connect_default()?;
    sleep(Duration::from_millis(100)).await;

    client.set_frequency(440)?;
    sleep(Duration::from_millis(700)).await;

    // "C" in Morse: dah dit dah dit
    for hold in [300u64, 100, 300, 100] {
        client.line_up()?;
        sleep(Duration::from_millis(hold)).await;
        client.line_down()?;
        sleep(Duration::from_millis(100)).await;
    }

    client.disconnect()?;
    sleep(Duration::from_millis(100)).await;
    println!("Done");
    Ok(())
}
