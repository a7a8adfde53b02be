//! Live device monitor.
//!
//! Demonstrates:
//! - Opening a session and subscribing to events
//! - Sending a command through the pool
//! - Status updates from notifications and background polling
//!
//! Usage:
//!   cargo run --example monitor -- 192.168.1.50
//!   cargo run --example monitor -- 192.168.1.50 --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use common::Args;
use madvr_client::{Command, Result, Session, SessionEvent};

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
    println!("=== Envy Monitor ===\n");

    // ========================================================================
    // Open Session
    // ========================================================================

    println!("[1] Connecting to {}...", args.host);

    let session = Session::builder().host(&args.host).build()?;
    session.subscribe(|event| match event {
        SessionEvent::StatusUpdated { status } => println!("    status: {}", status.to_json()),
        SessionEvent::Notification { notification } => println!("    <- {notification:?}"),
        SessionEvent::StateChanged { from, to } => println!("    state: {from} -> {to}"),
        other => println!("    {other:?}"),
    });

    session.open_connection().await?;
    println!("    ✓ Connected ({})\n", session.addr());

    // ========================================================================
    // Send Command
    // ========================================================================

    println!("[2] Showing a message on screen...");
    session
        .send_command(Command::display_message(3, "Hello from Rust")?)
        .await?;
    println!("    ✓ Sent\n");

    // ========================================================================
    // Watch
    // ========================================================================

    println!("[3] Watching device events...");
    common::wait_for_exit().await;

    session.close_connection().await;
    println!("    ✓ Closed");
    Ok(())
}
