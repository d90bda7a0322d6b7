//! Presentation boundary: the three callback surfaces a view layer observes,
//! and the adapter that drives them from a loader.
//!
//! A view layer implements [`ResourceView`], [`LoadingView`] and
//! [`ErrorView`] and owns them. The presenter only keeps [`Weak`] references,
//! so dropping a view silently stops its updates.
//!
//! ```ignore
//! let presenter = LoadResourcePresenter::new(&feed_view, &loading_view, &error_view, Ok);
//! let adapter = LoadResourcePresentationAdapter::new(
//!   service.feed_loader().on_main(queue.dispatcher()),
//!   presenter,
//! );
//! adapter.load(());
//! ```

use color_eyre::{Report, Result};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::debug;

use crate::loader::{LoadTask, MainThreadDispatch, ResourceLoader, TaskStatus};

/// Message shown when a load has failed for good.
pub const LOAD_ERROR_MESSAGE: &str = "Couldn't connect to server";

/// Whether a load is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLoadingViewModel {
  pub is_loading: bool,
}

/// Error to show, or `None` to hide any error currently shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceErrorViewModel {
  pub message: Option<String>,
}

impl ResourceErrorViewModel {
  pub fn none() -> Self {
    Self { message: None }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      message: Some(message.into()),
    }
  }
}

/// Receives the loaded resource, already mapped to a view model.
pub trait ResourceView: Send + Sync + 'static {
  type ViewModel;

  fn display(&self, view_model: Self::ViewModel);
}

pub trait LoadingView: Send + Sync + 'static {
  fn display_loading(&self, view_model: ResourceLoadingViewModel);
}

pub trait ErrorView: Send + Sync + 'static {
  fn display_error(&self, view_model: ResourceErrorViewModel);
}

type ViewModelMapper<R, VM> = Box<dyn Fn(R) -> Result<VM> + Send + Sync>;

/// Turns load events into view updates.
pub struct LoadResourcePresenter<R, V: ResourceView> {
  resource_view: Weak<V>,
  loading_view: Weak<dyn LoadingView>,
  error_view: Weak<dyn ErrorView>,
  mapper: ViewModelMapper<R, V::ViewModel>,
}

impl<R, V: ResourceView> LoadResourcePresenter<R, V> {
  pub fn new<L, E>(
    resource_view: &Arc<V>,
    loading_view: &Arc<L>,
    error_view: &Arc<E>,
    mapper: impl Fn(R) -> Result<V::ViewModel> + Send + Sync + 'static,
  ) -> Self
  where
    L: LoadingView,
    E: ErrorView,
  {
    let loading_view = Arc::downgrade(loading_view) as Weak<dyn LoadingView>;
    let error_view = Arc::downgrade(error_view) as Weak<dyn ErrorView>;

    Self {
      resource_view: Arc::downgrade(resource_view),
      loading_view,
      error_view,
      mapper: Box::new(mapper),
    }
  }

  pub fn did_start_loading(&self) {
    self.show_error(ResourceErrorViewModel::none());
    self.show_loading(true);
  }

  /// Show the resource. A resource the mapper rejects is shown as an error.
  pub fn did_finish_loading(&self, resource: R) {
    match (self.mapper)(resource) {
      Ok(view_model) => {
        if let Some(view) = self.resource_view.upgrade() {
          view.display(view_model);
        }
        self.show_loading(false);
      }
      Err(error) => self.did_finish_loading_with_error(&error),
    }
  }

  pub fn did_finish_loading_with_error(&self, error: &Report) {
    debug!(error = %error, "load failed, showing error");
    self.show_error(ResourceErrorViewModel::error(LOAD_ERROR_MESSAGE));
    self.show_loading(false);
  }

  fn show_loading(&self, is_loading: bool) {
    if let Some(view) = self.loading_view.upgrade() {
      view.display_loading(ResourceLoadingViewModel { is_loading });
    }
  }

  fn show_error(&self, view_model: ResourceErrorViewModel) {
    if let Some(view) = self.error_view.upgrade() {
      view.display_error(view_model);
    }
  }
}

#[derive(Default)]
struct AdapterState {
  task: Option<LoadTask>,
  is_loading: bool,
}

/// Starts loads on behalf of a view and reports them to a presenter.
///
/// At most one load runs at a time: a request made while a load is active is
/// ignored. Completions arrive on the loader's main context.
pub struct LoadResourcePresentationAdapter<L: ResourceLoader, V: ResourceView> {
  loader: MainThreadDispatch<L>,
  presenter: Arc<LoadResourcePresenter<L::Resource, V>>,
  state: Arc<Mutex<AdapterState>>,
}

impl<L, V> LoadResourcePresentationAdapter<L, V>
where
  L: ResourceLoader,
  V: ResourceView,
  V::ViewModel: 'static,
{
  pub fn new(
    loader: MainThreadDispatch<L>,
    presenter: LoadResourcePresenter<L::Resource, V>,
  ) -> Self {
    Self {
      loader,
      presenter: Arc::new(presenter),
      state: Arc::new(Mutex::new(AdapterState::default())),
    }
  }

  pub fn load(&self, key: L::Key) {
    {
      let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
      if state.is_loading {
        debug!("load already in progress, ignoring request");
        return;
      }
      state.is_loading = true;
    }

    self.presenter.did_start_loading();

    let presenter = Arc::clone(&self.presenter);
    let state = Arc::clone(&self.state);
    let task = self.loader.load(key, move |result| {
      {
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.is_loading = false;
        state.task = None;
      }
      match result {
        Ok(resource) => presenter.did_finish_loading(resource),
        Err(error) => presenter.did_finish_loading_with_error(&error),
      }
    });

    // A load that completed inline has already cleared the state.
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if task.status() == TaskStatus::Active {
      state.task = Some(task);
    }
  }

  /// Cancel the active load, if any. Its completion is never reported.
  pub fn cancel_load(&self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(task) = state.task.take() {
      task.cancel();
    }
    state.is_loading = false;
  }

  pub fn is_loading(&self) -> bool {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_loading
  }
}
