//! Server command implementation

use anyhow::Result;
use pennywise_core::Pipeline;

pub async fn cmd_serve(
    pipeline: Pipeline,
    host: &str,
    port: u16,
    no_owner_header: bool,
    owner: &str,
    no_encrypt: bool,
) -> Result<()> {
    println!("🚀 Starting Pennywise API server...");
    println!("   Database: {}", pipeline.db().path());
    println!("   Listening: http://{}:{}/api", host, port);

    if no_owner_header {
        println!();
        println!(
            "   ⚠️  x-owner-id header NOT required - requests act as '{}'",
            owner
        );
        println!("      Do not expose to network without an authenticating proxy!");
    } else {
        println!("   🔒 Owner: taken from the x-owner-id header");
    }
    if no_encrypt {
        println!("   ⚠️  Encryption DISABLED (--no-encrypt)");
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let config = pennywise_server::ServerConfig {
        require_owner: !no_owner_header,
        default_owner: owner.to_string(),
        allowed_origins: vec![],
    };

    pennywise_server::serve_with_config(pipeline, host, port, config).await?;

    Ok(())
}
