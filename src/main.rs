use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use feedloader::cache::{FeedStore, ImageDataStore, InMemoryStore, LocalFeedLoader, SqliteStore};
use feedloader::config::{Config, LogConfig};
use feedloader::event::{lifecycle_channel, spawn_cache_validation, LifecycleEvent};
use feedloader::feed::{FeedImage, FeedService, Paginated, ReqwestHttpClient};
use feedloader::loader::{loader_fn, LoaderExt, MainQueue, ResourceLoader};
use feedloader::presenter::{
  ErrorView, LoadResourcePresentationAdapter, LoadResourcePresenter, LoadingView,
  ResourceErrorViewModel, ResourceLoadingViewModel, ResourceView,
};

#[derive(Parser, Debug)]
#[command(name = "feedloader")]
#[command(about = "Load an image feed with offline caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/feedloader/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  no_cache: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the feed, falling back to the cache when offline
  Feed {
    /// Number of pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: usize,
  },
  /// Fetch image bytes through the cache
  Image {
    url: Url,
    /// Write the bytes to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// Drop the cached feed if it has expired
  Validate,
}

fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

  let Some(log_path) = &config.file else {
    tracing_subscriber::registry()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr))
      .init();
    return Ok(None);
  };

  let dir = log_path
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("."));
  let file_name = log_path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", log_path.display()))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .init();

  info!(path = %log_path.display(), "Logging initialized");
  Ok(Some(guard))
}

/// Prints feed pages to stdout and keeps the latest one for paging.
#[derive(Default)]
struct ConsoleFeedView {
  page: Mutex<Option<Paginated<FeedImage>>>,
  printed: Mutex<usize>,
}

impl ConsoleFeedView {
  fn take_page(&self) -> Option<Paginated<FeedImage>> {
    self.page.lock().unwrap_or_else(PoisonError::into_inner).take()
  }
}

impl ResourceView for ConsoleFeedView {
  type ViewModel = Paginated<FeedImage>;

  fn display(&self, page: Paginated<FeedImage>) {
    let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
    // Pages carry every item so far; only print what is new.
    for image in page.items.iter().skip(*printed) {
      let description = image.description.as_deref().unwrap_or("-");
      let location = image.location.as_deref().unwrap_or("-");
      println!("{}\t{}\t{}\t{}", image.id, description, location, image.url);
    }
    *printed = page.items.len();
    *self.page.lock().unwrap_or_else(PoisonError::into_inner) = Some(page);
  }
}

impl LoadingView for ConsoleFeedView {
  fn display_loading(&self, view_model: ResourceLoadingViewModel) {
    debug!(is_loading = view_model.is_loading, "loading state changed");
  }
}

impl ErrorView for ConsoleFeedView {
  fn display_error(&self, view_model: ResourceErrorViewModel) {
    if let Some(message) = view_model.message {
      eprintln!("{}", message);
    }
  }
}

async fn print_feed<S: FeedStore + ImageDataStore>(
  service: &FeedService<ReqwestHttpClient, S>,
  pages: usize,
) -> Result<()> {
  let mut queue = MainQueue::new();
  let view = Arc::new(ConsoleFeedView::default());
  let first_page = LoadResourcePresentationAdapter::new(
    service.feed_loader().on_main(queue.dispatcher()),
    LoadResourcePresenter::new(&view, &view, &view, |page: Paginated<FeedImage>| Ok(page)),
  );
  let next_page = LoadResourcePresentationAdapter::new(
    loader_fn(|page: Paginated<FeedImage>| async move {
      match page.load_more() {
        Some(next) => next.await,
        None => Err(eyre!("no more pages")),
      }
    })
    .on_main(queue.dispatcher()),
    LoadResourcePresenter::new(&view, &view, &view, |page: Paginated<FeedImage>| Ok(page)),
  );

  first_page.load(());
  while first_page.is_loading() {
    queue.run_next().await;
  }

  for _ in 1..pages {
    let Some(page) = view.take_page().filter(|page| page.has_more()) else {
      debug!("no more pages");
      break;
    };

    next_page.load(page);
    while next_page.is_loading() {
      queue.run_next().await;
    }
  }

  Ok(())
}

async fn fetch_image<S: FeedStore + ImageDataStore>(
  service: &FeedService<ReqwestHttpClient, S>,
  url: Url,
  output: Option<PathBuf>,
) -> Result<()> {
  let data = service.image_data_loader().load(url.clone()).await?;
  info!(url = %url, bytes = data.len(), "image data loaded");

  match output {
    Some(path) => std::fs::write(&path, &data)
      .map_err(|e| eyre!("Failed to write image to {}: {}", path.display(), e))?,
    None => println!("{} bytes", data.len()),
  }

  Ok(())
}

async fn run<S: FeedStore + ImageDataStore>(
  command: Command,
  config: &Config,
  store: Arc<S>,
) -> Result<()> {
  let (lifecycle, events) = lifecycle_channel();

  match command {
    Command::Feed { pages } => {
      let client = Arc::new(ReqwestHttpClient::new()?);
      let service =
        FeedService::new(client, store, config.endpoint()?).with_policy(config.cache_policy()?);
      let validation = spawn_cache_validation(service.feed_cache().clone(), events);

      print_feed(&service, pages).await?;

      lifecycle.send(LifecycleEvent::WillResignActive);
      drop(lifecycle);
      validation.await?;
    }
    Command::Image { url, output } => {
      let client = Arc::new(ReqwestHttpClient::new()?);
      let service = FeedService::new(client, store, config.endpoint()?);
      fetch_image(&service, url, output).await?;
    }
    Command::Validate => {
      let cache = LocalFeedLoader::new(store).with_policy(config.cache_policy()?);
      let validation = spawn_cache_validation(cache, events);

      lifecycle.send(LifecycleEvent::WillResignActive);
      drop(lifecycle);
      validation.await?;
      info!("feed cache validated");
    }
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config.log)?;

  if args.no_cache {
    debug!("using in-memory cache");
    return run(args.command, &config, Arc::new(InMemoryStore::new())).await;
  }

  let cache_path = config.cache_path()?;
  let store = Arc::new(SqliteStore::open(Some(&cache_path))?);
  debug!(path = %cache_path.display(), "cache opened");

  run(args.command, &config, store).await
}
