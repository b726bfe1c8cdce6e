// web-server/src/static_files.rs
use std::path::PathBuf;

use actix_files::Files;
use actix_web::web;
use common::WebDavConfig;

// Configuration for serving the WebDAV tree read-only
#[derive(Debug, Clone)]
pub struct DavFilesConfig {
    pub root_path: PathBuf,
    pub show_index: bool,
}

impl From<&WebDavConfig> for DavFilesConfig {
    fn from(config: &WebDavConfig) -> Self {
        Self {
            root_path: PathBuf::from(&config.directory),
            show_index: true,
        }
    }
}

/// GET/HEAD file access below the scope this is mounted in. Other WebDAV
/// methods are answered by the DAV engine mounted alongside.
pub fn configure(cfg: &mut web::ServiceConfig, config: DavFilesConfig) {
    if !config.root_path.exists() {
        tracing::warn!(
            "WebDAV directory {} does not exist yet",
            config.root_path.display()
        );
    }

    let mut files = Files::new("", &config.root_path)
        .prefer_utf8(true)
        .use_etag(true)
        .use_last_modified(true);
    if config.show_index {
        files = files.show_files_listing();
    }
    cfg.service(files);
}
