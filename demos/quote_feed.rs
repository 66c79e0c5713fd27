use relay_cache::logging::init_tracing;
use relay_cache::prelude::*;
use relay_cache::test::EchoController;
use relay_cache::test::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let producer = Arc::new(EchoController::with_latency(Duration::from_millis(100)));
    let store: Arc<dyn DurableStore<EchoController>> = Arc::new(MemoryStore::<EchoController>::new());

    let cache = RelayCache::builder()
        .name("quotes")
        .data_controller(Arc::clone(&producer))
        .store(store)
        .max_age(Duration::from_millis(300))
        .build()
        .map_err(|err| format!("failed to build cache: {err:?}"))?;

    let mut feed = cache.read("ACME".into(), "ACME".into(), "quote:".into()).await;
    let watcher = tokio::spawn(async move {
        while let Some(delivery) = feed.next().await {
            match delivery {
                Ok(quote) => println!("received {quote}"),
                Err(err) => {
                    println!("feed failed: {err}");
                    break;
                }
            }
        }
    });

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(400)).await;
        // Another reader of the same key: gets the latest quote at once and triggers a staleness check.
        let mut reader = cache.read("ACME".into(), "ACME".into(), "quote:".into()).await;
        if let Some(Ok(quote)) = reader.recv().await {
            println!("reader saw {quote}");
        }
    }

    cache.invalidate(&"ACME".to_string()).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("producer called {} times", producer.calls());
    cache.close().await;
    watcher.abort();

    Ok(())
}
