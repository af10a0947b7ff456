//! Simple example of using proxy-finder.

use proxy_finder::{
    FinderConfig, ProxyFinder, ProxyStorage, SortKey, Sources, StaticSource, UrlListSource,
    WriterSink,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("Fetching and validating proxies...");

    let config = FinderConfig::builder()
        .count(5)
        .countries(vec!["US", "GB"])
        .probe_timeout(Duration::from_secs(10))
        .concurrency(16)
        .sort(SortKey::Speed)
        .build()?;

    // Seed the run with recently validated proxies from a previous one.
    let storage = ProxyStorage::new("proxy_cache.json");
    let cached = storage.load(Duration::from_secs(3600)).unwrap_or_default();

    let sources = Sources::new()
        .with_primary(UrlListSource::new(
            "proxyscrape",
            "https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&country={country}&timeout=10000",
        ))
        .with_primary(StaticSource::from_validated("cache", &cached))
        // Plain lists carry no country information; they are used for
        // unfiltered runs only.
        .with_secondary(UrlListSource::new(
            "github-speedx",
            "https://raw.githubusercontent.com/TheSpeedX/PROXY-List/master/http.txt",
        ));

    let mut finder = ProxyFinder::new(config, sources);
    let report = finder.refresh().await?;

    let mut sink = WriterSink::stdout();
    finder.deliver(&mut sink, &report);

    // Rotate through the validated pool.
    for _ in 0..3 {
        match finder.next().await {
            Ok(proxy) => println!("next proxy: {}", proxy.key),
            Err(err) => {
                println!("{err}");
                break;
            }
        }
    }

    // Keep the survivors for the next run.
    if let Err(err) = storage.save(&finder.pool().snapshot()) {
        eprintln!("could not save proxy cache: {err}");
    }

    Ok(())
}
