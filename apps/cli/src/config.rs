use std::{collections::HashMap, fs, time::Duration};

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub app: String,
    pub search_collection: String,
    pub request_collection: String,
    pub form_key: Option<String>,
    pub commit_timeout: Duration,
    pub commit_max_retries: u32,
    pub commit_initial_backoff: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8089".into(),
            app: "catalog".into(),
            search_collection: "catalog_options".into(),
            request_collection: "selfservice_requests".into(),
            form_key: None,
            commit_timeout: Duration::from_secs(15),
            commit_max_retries: 2,
            commit_initial_backoff: Duration::from_millis(500),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("catalog.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("base_url") {
                settings.base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("app") {
                settings.app = v.clone();
            }
            if let Some(v) = file_cfg.get("search_collection") {
                settings.search_collection = v.clone();
            }
            if let Some(v) = file_cfg.get("request_collection") {
                settings.request_collection = v.clone();
            }
            if let Some(v) = file_cfg.get("form_key") {
                settings.form_key = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("CATALOG__BASE_URL") {
        settings.base_url = v;
    }
    if let Ok(v) = std::env::var("CATALOG__APP") {
        settings.app = v;
    }
    if let Ok(v) = std::env::var("CATALOG__SEARCH_COLLECTION") {
        settings.search_collection = v;
    }
    if let Ok(v) = std::env::var("CATALOG__REQUEST_COLLECTION") {
        settings.request_collection = v;
    }
    if let Ok(v) = std::env::var("CATALOG__FORM_KEY") {
        settings.form_key = Some(v);
    }
    if let Ok(v) = std::env::var("CATALOG__COMMIT_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.commit_timeout = Duration::from_millis(parsed);
        }
    }
    if let Ok(v) = std::env::var("CATALOG__COMMIT_MAX_RETRIES") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.commit_max_retries = parsed;
        }
    }
    if let Ok(v) = std::env::var("CATALOG__COMMIT_INITIAL_BACKOFF_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.commit_initial_backoff = Duration::from_millis(parsed);
        }
    }

    settings
}
