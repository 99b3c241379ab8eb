//! Launch a browser, load a page and save a screenshot
//!
//! cargo run -p browser --example capture_page -- https://www.rust-lang.org out.png

use browser::{BrowserKind, BrowserLauncher, ChromeLauncher, LaunchOptions};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| "https://www.rust-lang.org".to_string());
    let out = args.next().unwrap_or_else(|| "page.png".to_string());

    let launcher = ChromeLauncher::default();
    let page = launcher
        .launch(&LaunchOptions {
            kind: BrowserKind::Chromium,
            width: 1280,
            height: 720,
        })
        .await?;

    let result = async {
        page.goto(&url, Duration::from_secs(30)).await?;
        if let Err(e) = page.wait_for_network_idle(Duration::from_secs(5)).await {
            println!("Network never settled: {}", e);
        }
        println!("{} - {}", page.title().await?, page.url().await?);

        let png = page.screenshot().await?;
        tokio::fs::write(&out, &png).await?;
        println!("Saved {} bytes to {}", png.len(), out);
        Ok::<_, Box<dyn std::error::Error>>(())
    }
    .await;

    page.close().await?;
    result
}
