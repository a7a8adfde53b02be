//! Wake-on-LAN power-on.
//!
//! Demonstrates:
//! - Waking the device with a MAC address supplied at call time
//! - Waiting for the power-on outcome event
//!
//! Usage:
//!   cargo run --example power_on -- 192.168.1.50 01:02:03:04:05:06

mod common;

// ============================================================================
// Imports
// ============================================================================

use parking_lot::Mutex;
use tokio::sync::oneshot;

use common::Args;
use madvr_client::{Error, MacAddress, Result, Session, SessionEvent};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Envy Power On ===\n");

    let mac: Option<MacAddress> = args.mac.as_deref().map(str::parse).transpose()?;
    let session = Session::builder().host(&args.host).build()?;

    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    session.subscribe(move |event| {
        if let SessionEvent::PowerOnComplete { reachable } = event
            && let Some(tx) = tx.lock().take()
        {
            let _ = tx.send(*reachable);
        }
    });

    println!("[1] Sending wake signal...");
    session.power_on(mac).await?;
    println!("    ✓ Sent, state: {}\n", session.state());

    println!("[2] Waiting for the device...");
    let reachable = rx.await.map_err(|_| Error::ConnectionClosed)?;

    if reachable {
        println!("    ✓ Device is up");
        session.open_connection().await?;
        println!("    ✓ Session open, status: {}", session.status().to_json());
        session.close_connection().await;
    } else {
        println!("    ✗ Device did not answer within the power-on window");
    }
    Ok(())
}
