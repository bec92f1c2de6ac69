use std::sync::Arc;

use bookcrawl::cli::Cli;
use bookcrawl::storage::{GraphDbConfig, GraphDbStorage, MemoryStorage, Storage};
use bookcrawl::{
    dot, logging, urls, BookGraph, CrawlEngine, CrawlError, CrawlerConfig, FetcherConfig,
    HttpFetcher,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    logging::init(cli.verbose);

    if let Err(error) = run(cli).await {
        match error {
            CrawlError::Cancelled => eprintln!("crawl cancelled"),
            error => tracing::error!(%error, "crawl did not complete"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CrawlError> {
    let seed = urls::normalize_seed(&cli.url);
    url::Url::parse(&seed)
        .map_err(|e| CrawlError::Config(format!("invalid seed url {:?}: {}", cli.url, e)))?;
    if !urls::is_book_url(&seed) {
        return Err(CrawlError::Config(format!(
            "seed url does not look like a book page: {}",
            seed
        )));
    }

    let storage: Arc<dyn Storage> = if cli.graph_db {
        Arc::new(GraphDbStorage::new(GraphDbConfig {
            url: cli.graph_db_url.clone(),
            user: cli.graph_db_user.clone(),
            password: cli.graph_db_password.clone(),
        }))
    } else {
        Arc::new(MemoryStorage::new())
    };
    storage.initialize().await?;

    let fetcher = HttpFetcher::new(FetcherConfig {
        max_parallelism: cli.parallelism,
        max_retries: cli.max_retries,
        min_retry_wait: cli.min_retry_wait,
        max_retry_wait: cli.max_retry_wait,
        ..FetcherConfig::default()
    })?;

    let engine = CrawlEngine::new(
        CrawlerConfig {
            max_depth: cli.max_depth,
            max_read_also: cli.max_read_also,
            min_num_ratings: cli.min_num_ratings,
            max_num_ratings: cli.max_num_ratings,
            min_rating: cli.min_rating,
            max_rating: cli.max_rating,
        },
        Arc::new(fetcher),
        Arc::clone(&storage),
    );

    engine.run(&seed).await?;

    if cli.dot {
        tracing::info!("printing results as a dot file");
        let graph = BookGraph::assemble(storage.as_ref(), &seed, cli.max_depth).await?;
        print!("{}", dot::render(&graph));
    }

    storage.shutdown().await?;
    Ok(())
}
