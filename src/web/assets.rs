//! Static web UI files with a fixed content type per extension.

use std::path::{Path, PathBuf};

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Asset {
    /// Path relative to the web root
    pub relative: PathBuf,
    pub content_type: &'static str,
}

impl Asset {
    /// Map a request path to a file under the web root. Scripts, styles and
    /// images live in `js/`, `css/` and `img/`.
    pub fn resolve(path: &str) -> Option<Self> {
        let name = path.trim_start_matches('/');
        if name.is_empty() || name.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            return None;
        }

        let (subdir, content_type) = match Path::new(name).extension()?.to_str()? {
            "html" => ("", "text/html"),
            "js" => ("js", "application/javascript"),
            "css" => ("css", "text/css"),
            "png" => ("img", "image/png"),
            _ => return None,
        };

        Some(Self {
            relative: Path::new(subdir).join(name),
            content_type,
        })
    }
}

pub(super) async fn serve(root: &Path, asset: &Asset) -> Response {
    let path = root.join(&asset.relative);
    match tokio::fs::read(&path).await {
        Ok(content) => ([(header::CONTENT_TYPE, asset.content_type)], content).into_response(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Asset not found");
            (StatusCode::NOT_FOUND, "404 Not Found").into_response()
        }
    }
}
