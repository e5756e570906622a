//! Session cookies that outlive a single process. The service keys its
//! session on a cookie, so a command-line client has to carry the jar from
//! one run to the next.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use reqwest::cookie::{CookieStore, Jar};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCookies {
    #[serde(default)]
    sites: Vec<StoredSite>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSite {
    url: String,
    cookie: String,
}

pub struct SessionCookies {
    path: PathBuf,
    jar: Arc<Jar>,
}

impl SessionCookies {
    /// Loads the jar saved at `path`. A missing file yields an empty jar.
    pub fn load(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let jar = Arc::new(Jar::default());
        let stored = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<StoredCookies>(&raw)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoredCookies::default(),
            Err(err) => return Err(err),
        };

        for site in &stored.sites {
            let Ok(url) = Url::parse(&site.url) else {
                debug!(url = %site.url, "cookies: skipping unparseable site");
                continue;
            };
            for pair in site.cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(&format!("{pair}; Path=/"), &url);
            }
        }
        debug!(path = %path.display(), sites = stored.sites.len(), "cookies: loaded");
        Ok(Self { path, jar })
    }

    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the cookies the jar would send to each of `urls`.
    pub fn save<'a>(&self, urls: impl IntoIterator<Item = &'a Url>) -> io::Result<()> {
        let mut stored = StoredCookies::default();
        for url in urls {
            if stored.sites.iter().any(|site| site.url == url.as_str()) {
                continue;
            }
            let Some(header) = self.jar.cookies(url) else {
                continue;
            };
            let Ok(cookie) = header.to_str() else {
                continue;
            };
            stored.sites.push(StoredSite {
                url: url.to_string(),
                cookie: cookie.to_string(),
            });
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&stored)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.path, raw)?;
        debug!(path = %self.path.display(), sites = stored.sites.len(), "cookies: saved");
        Ok(())
    }
}
