//! The current-page collaborator.

use std::sync::RwLock;

use url::Url;

use crate::sync::{read, write};

/// Handle to the page the engine is rendering into.
pub trait Page: Send + Sync + 'static {
    fn url(&self) -> Url;

    /// Replace the page URL without triggering a navigation.
    fn replace_url(&self, url: &Url);
}

/// In-memory page, used when the host does not provide one.
#[derive(Debug)]
pub struct RequestPage {
    url: RwLock<Url>,
}

impl RequestPage {
    pub fn new(url: Url) -> Self {
        Self {
            url: RwLock::new(url),
        }
    }
}

/// URL of the page used when the host does not provide one.
pub const DEFAULT_PAGE_URL: &str = "http://localhost/";

impl Default for RequestPage {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_PAGE_URL).expect("default page url is valid"))
    }
}

impl Page for RequestPage {
    fn url(&self) -> Url {
        read(&self.url).clone()
    }

    fn replace_url(&self, url: &Url) {
        *write(&self.url) = url.clone();
    }
}
