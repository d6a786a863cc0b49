//! Preview dispatcher
//!
//! Maps a request path onto a file under the site root and, for existing
//! HTML pages, rebuilds the site before reading the file.

use crate::config::Config;
use crate::handler::builder::{BuildError, BuildGate, BuildOutcome, CommandBuilder};
use crate::http::mime;
use crate::logger;
use hyper::body::Bytes;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const INDEX_FILE: &str = "index.html";
const HTML_SUFFIX: &str = ".html";

/// Inbound request as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRequest {
    path_info: String,
}

impl PreviewRequest {
    pub fn new(path_info: impl Into<String>) -> Self {
        Self {
            path_info: path_info.into(),
        }
    }

    pub fn path_info(&self) -> &str {
        &self.path_info
    }
}

/// Append the index file to directory-style paths
///
/// This is the only rewrite applied to a request path.
pub fn rewrite_path(path: &str) -> Cow<'_, str> {
    if path.ends_with('/') {
        Cow::Owned(format!("{path}{INDEX_FILE}"))
    } else {
        Cow::Borrowed(path)
    }
}

/// A request path resolved against the site root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    request_path: String,
    path: PathBuf,
}

impl ResolvedResource {
    /// Join `request_path` (already rewritten) onto `site_root`
    ///
    /// Returns `None` when the path would leave the site root.
    pub fn resolve(site_root: &Path, request_path: &str) -> Option<Self> {
        let relative = Path::new(request_path.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }

        Some(Self {
            request_path: request_path.to_string(),
            path: site_root.join(relative),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a regular file exists at the resolved path
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .is_ok_and(|meta| meta.is_file())
    }

    /// Pages whose request triggers a rebuild
    pub fn is_html(&self) -> bool {
        self.request_path.ends_with(HTML_SUFFIX)
    }

    pub fn content_type(&self) -> &'static str {
        mime::get_content_type(self.path.extension().and_then(|e| e.to_str()))
    }
}

/// File contents ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub path: PathBuf,
    pub body: Bytes,
    pub content_type: &'static str,
}

/// Dispatcher result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewResponse {
    Static(StaticFile),
    /// Carries the original, pre-rewrite request path
    NotFound(String),
}

/// Faults left to the hosting layer
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("site build could not run: {0}")]
    Build(#[from] BuildError),
}

/// Resolves requests against the site root, rebuilding HTML on demand
#[derive(Debug)]
pub struct Dispatcher {
    site_root: PathBuf,
    rebuild: Option<BuildGate>,
}

impl Dispatcher {
    /// Serve `site_root` without rebuilding
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            rebuild: None,
        }
    }

    /// Rebuild through `gate` before serving existing HTML pages
    #[must_use]
    pub fn with_rebuild(mut self, gate: BuildGate) -> Self {
        self.rebuild = Some(gate);
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let dispatcher = Self::new(config.site.root.clone());
        if config.build.enabled {
            let builder = CommandBuilder::from_config(&config.build);
            dispatcher.with_rebuild(BuildGate::new(Arc::new(builder), config.build.mode))
        } else {
            dispatcher
        }
    }

    pub fn site_root(&self) -> &Path {
        &self.site_root
    }

    pub async fn dispatch(&self, req: &PreviewRequest) -> Result<PreviewResponse, DispatchError> {
        let original = req.path_info();
        let rewritten = rewrite_path(original);

        let Some(resource) = ResolvedResource::resolve(&self.site_root, &rewritten) else {
            logger::log_warning(&format!("Path traversal attempt blocked: {original}"));
            return Ok(PreviewResponse::NotFound(original.to_string()));
        };

        if !resource.exists().await {
            logger::log_debug(&format!(
                "[Dispatch] {original} -> {} (missing)",
                resource.path().display()
            ));
            return Ok(PreviewResponse::NotFound(original.to_string()));
        }

        if let Some(gate) = self.rebuild.as_ref().filter(|_| resource.is_html()) {
            rebuild_site(gate, original).await?;
        }

        // Read only after the build so fresh output is served
        match fs::read(resource.path()).await {
            Ok(content) => Ok(PreviewResponse::Static(StaticFile {
                body: Bytes::from(content),
                content_type: resource.content_type(),
                path: resource.path,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                logger::log_warning(&format!(
                    "{} disappeared during rebuild",
                    resource.path.display()
                ));
                Ok(PreviewResponse::NotFound(original.to_string()))
            }
            Err(source) => Err(DispatchError::Read {
                path: resource.path,
                source,
            }),
        }
    }
}

async fn rebuild_site(gate: &BuildGate, trigger: &str) -> Result<(), BuildError> {
    logger::log_build_started(&gate.describe(), trigger);
    match gate.rebuild().await {
        Ok(BuildOutcome::Completed(status)) => {
            logger::log_build_finished(&status);
            Ok(())
        }
        Ok(BuildOutcome::Coalesced) => {
            logger::log_build_coalesced(trigger);
            Ok(())
        }
        Err(e) => {
            logger::log_error(&format!("[Build] {e}"));
            Err(e)
        }
    }
}
