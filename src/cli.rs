use crate::storage::DEFAULT_GRAPH_DB_URL;
use clap::Parser;
use std::time::Duration;

/// book recommendation graph crawler
#[derive(Debug, Parser)]
#[command(name = "bookcrawl")]
#[command(about = "Crawls the 'readers also enjoyed' graph from a seed book page")]
#[command(version)]
pub struct Cli {
    /// The book URL to start crawling from
    pub url: String,

    /// How deep to traverse the recommendation graph
    #[arg(short = 'd', long, default_value_t = 3)]
    pub max_depth: u32,

    /// How many related books to follow from a given book
    #[arg(short = 'r', long, default_value_t = 5)]
    pub max_read_also: usize,

    /// How many requests are allowed in parallel
    #[arg(short = 'p', long, default_value_t = 10)]
    pub parallelism: usize,

    /// How many times to retry a failed request
    #[arg(long, default_value_t = 4)]
    pub max_retries: u32,

    /// Minimum time to wait in between retries (e.g. 500ms, 1s, 2m)
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub min_retry_wait: Duration,

    /// Maximum time to wait in between retries
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    pub max_retry_wait: Duration,

    /// Only persist and follow books with at least this many ratings.
    /// Set to a negative number to disable this check
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub min_num_ratings: i32,

    /// Only persist and follow books with at most this many ratings.
    /// Set to a negative number to disable this check
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_num_ratings: i32,

    /// Only persist and follow books rated at least this much, in
    /// hundredths (4.2 stars -> 420). Set to a negative number to disable
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub min_rating: i32,

    /// Only persist and follow books rated at most this much, in
    /// hundredths. Set to a negative number to disable
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_rating: i32,

    /// Print the run results as a dot file (stdout)
    #[arg(long)]
    pub dot: bool,

    /// Use the graph database as storage
    #[arg(long)]
    pub graph_db: bool,

    /// Graph database address
    #[arg(long, default_value = DEFAULT_GRAPH_DB_URL)]
    pub graph_db_url: String,

    /// User when connecting to the graph database
    #[arg(long, default_value = "")]
    pub graph_db_user: String,

    /// Password when connecting to the graph database
    #[arg(long, default_value = "")]
    pub graph_db_password: String,

    /// Be more verbose by logging in debug mode
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Parse durations like "500ms", "1s", "2m", or bare seconds.
fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let parse = |digits: &str| {
        digits
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid duration: {:?}", text))
    };

    if let Some(millis) = text.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(millis)?));
    }
    if let Some(secs) = text.strip_suffix('s') {
        return Ok(Duration::from_secs(parse(secs)?));
    }
    if let Some(mins) = text.strip_suffix('m') {
        return Ok(Duration::from_secs(parse(mins)? * 60));
    }
    Ok(Duration::from_secs(parse(text)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let cli = Cli::parse_from(["bookcrawl", "https://books.test/book/show/1"]);
        assert_eq!(cli.max_depth, 3);
        assert_eq!(cli.max_read_also, 5);
        assert_eq!(cli.parallelism, 10);
        assert_eq!(cli.max_retries, 4);
        assert_eq!(cli.min_retry_wait, Duration::from_secs(1));
        assert_eq!(cli.max_retry_wait, Duration::from_secs(15));
        assert_eq!(cli.min_num_ratings, -1);
        assert_eq!(cli.max_num_ratings, -1);
        assert_eq!(cli.min_rating, -1);
        assert_eq!(cli.max_rating, -1);
        assert!(!cli.dot);
        assert!(!cli.graph_db);
        assert_eq!(cli.graph_db_url, DEFAULT_GRAPH_DB_URL);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_negative_filter_values_are_accepted() {
        let cli = Cli::parse_from([
            "bookcrawl",
            "--min-rating",
            "-1",
            "--max-num-ratings",
            "50000",
            "https://books.test/book/show/1",
        ]);
        assert_eq!(cli.min_rating, -1);
        assert_eq!(cli.max_num_ratings, 50000);
    }
}
