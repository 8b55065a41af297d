//! esav-live-tail: follow one live query from the terminal.
//!
//! Usage: `esav-live-tail <queryId> <descriptor-json>`
//!
//! The endpoint and backoff come from the `ESAV_*` environment variables
//! (see `LiveConfig::from_env`).

use anyhow::{bail, Context, Result};
use esav_live::{logging, LiveClient, QueryResult};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("esav_live=info");

    let mut args = std::env::args().skip(1);
    let (Some(query_id), Some(descriptor)) = (args.next(), args.next()) else {
        bail!("usage: esav-live-tail <queryId> <descriptor-json>");
    };
    let descriptor: serde_json::Value =
        serde_json::from_str(&descriptor).context("descriptor is not valid JSON")?;

    let mut client = LiveClient::from_env().context("invalid live client configuration")?;
    let mut query = client.query(query_id, descriptor);

    let mut last: Option<QueryResult> = None;
    loop {
        let result = query.snapshot();
        if last.as_ref() != Some(&result) {
            print_result(&result);
            last = Some(result);
        }

        tokio::select! {
            _ = query.changed() => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(query);
    client.shutdown().await;
    println!("{}", client.context().describe());
    Ok(())
}

fn print_result(result: &QueryResult) {
    if let Some(banner) = result.status.banner() {
        println!("[{}] {}", result.status, banner);
    }
    if result.is_loading {
        println!("loading...");
        return;
    }
    println!(
        "{} results (ecid {})",
        result.uris.len(),
        result.ecid.as_deref().unwrap_or("-")
    );
    for document in &result.data {
        let uri = document.doc.uri.as_deref().unwrap_or(&document.cid);
        let title = document
            .doc
            .get_str("title")
            .or_else(|| document.doc.get_str("text"))
            .unwrap_or("");
        println!("  {uri}  {title}");
    }
}
