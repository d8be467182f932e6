//! Navigate, wait for the page to settle, then find elements through shadow roots
//!
//! Usage: settle_page <browser ws url> [page url] [selector]

use frame_dom::SelectorEngineRegistry;
use frame_settle::{PageConfig, PageEvent, SettlingPage};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let cdp_url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:9222/devtools/browser".to_string());
    let page_url = args
        .next()
        .unwrap_or_else(|| "https://example.com".to_string());
    let selector = args.next().unwrap_or_else(|| "a".to_string());

    let config = PageConfig {
        cdp_url,
        ..PageConfig::default()
    };
    let engines = Arc::new(SelectorEngineRegistry::new());
    let page = SettlingPage::connect(config, engines).await?;
    println!("Connected, page {}", page.main_target().id);

    let mut events = page.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PageEvent::SessionAliased { frame_id } = &event {
                println!("Frame {} shares the page session", frame_id);
            } else {
                println!("Event: {:?}", event);
            }
        }
    });

    page.send("Page.navigate", Some(json!({ "url": page_url })))
        .await?;
    let outcome = page.await_settled(None).await?;
    println!(
        "Settled ({:?}) in {:?}, {} still pending, {} evicted",
        outcome.reason, outcome.elapsed, outcome.pending, outcome.evicted
    );

    for backend_id in page.query_selector_all(None, &selector).await? {
        let address = page.encode(None, backend_id).await;
        let object = page.resolve_address(&address).await?;
        println!("{} -> {}", address, object["description"]);
    }

    page.close().await?;
    println!("Disconnected");

    Ok(())
}
