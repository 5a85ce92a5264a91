use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;

use crate::bot::messenger::Messenger;
use crate::bot::session::PollIndex;
use crate::bot::session::SessionStore;
use crate::cache::PendingStore;
use crate::config::RuntimeSettings;
use crate::delivery::DeliverySink;
use crate::models::Registration;
use crate::models::ShelterList;

/// Where the admin reload commands read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
  pub config_path: PathBuf,
  pub shelters_path: PathBuf,
}

pub struct AppContext {
  pub messenger: Arc<dyn Messenger>,
  pub sink: Arc<dyn DeliverySink>,
  pub store: Arc<PendingStore<Registration>>,
  pub sessions: SessionStore,
  pub polls: PollIndex,
  pub bot_username: String,
  pub sources: ConfigSources,
  shelters: RwLock<Arc<ShelterList>>,
  settings: RwLock<Arc<RuntimeSettings>>,
}

impl AppContext {
  pub fn new(
    messenger: Arc<dyn Messenger>,
    sink: Arc<dyn DeliverySink>,
    store: Arc<PendingStore<Registration>>,
    shelters: ShelterList,
    settings: RuntimeSettings,
    sources: ConfigSources,
  ) -> Self {
    Self {
      messenger,
      sink,
      store,
      sessions: SessionStore::new(),
      polls: PollIndex::new(),
      bot_username: String::new(),
      sources,
      shelters: RwLock::new(Arc::new(shelters)),
      settings: RwLock::new(Arc::new(settings)),
    }
  }

  pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
    self.bot_username = username.into();
    self
  }

  pub fn shelters(&self) -> Arc<ShelterList> {
    self.shelters.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
  }

  pub fn replace_shelters(&self, shelters: ShelterList) {
    *self.shelters.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(shelters);
  }

  pub fn settings(&self) -> Arc<RuntimeSettings> {
    self.settings.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
  }

  pub fn replace_settings(&self, settings: RuntimeSettings) {
    *self.settings.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(settings);
  }

  pub fn is_admin(&self, chat_id: i64) -> bool {
    self.settings().admin_chat_id == Some(chat_id)
  }
}


#[cfg(test)]
mod tests {
  use super::test_support::ADMIN_CHAT;
  use super::test_support::test_app;
  use crate::models::ShelterList;
  use crate::models::fixtures;

  #[test]
  fn replaced_catalog_is_visible_to_new_readers() {
    let app = test_app();
    let before = app.ctx.shelters();
    app
      .ctx
      .replace_shelters(ShelterList::new(vec![fixtures::saturday_shelter(5, "Новый")]).unwrap());

    assert_eq!(before.len(), 3);
    assert_eq!(app.ctx.shelters().len(), 1);
    assert!(app.ctx.is_admin(ADMIN_CHAT));
    assert!(!app.ctx.is_admin(1));
  }
}
