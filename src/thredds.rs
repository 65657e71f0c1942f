use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::InventoryError;
use crate::lister::{DirectoryLister, ListingEntry, RemotePath};

pub const THREDDS_NS: &[u8] = b"http://www.unidata.ucar.edu/namespaces/thredds/InvCatalog/v1.0";
pub const XLINK_NS: &[u8] = b"http://www.w3.org/1999/xlink";
const CATALOG_DOCUMENT: &str = "catalog.xml";

/// Which nested elements to read and which attribute to take from them.
///
/// Containers are `dataset/catalogRef[@xlink:title]`; leaf files are
/// `dataset/dataset[@urlPath]`.
#[derive(Debug, Clone, Copy)]
pub struct CatalogQuery {
    pub container_tag: &'static str,
    pub child_tag: &'static str,
    pub attribute_ns: Option<&'static [u8]>,
    pub attribute: &'static str,
}

pub const CONTAINER_QUERY: CatalogQuery = CatalogQuery {
    container_tag: "dataset",
    child_tag: "catalogRef",
    attribute_ns: Some(XLINK_NS),
    attribute: "title",
};

pub const FILE_QUERY: CatalogQuery = CatalogQuery {
    container_tag: "dataset",
    child_tag: "dataset",
    attribute_ns: None,
    attribute: "urlPath",
};

pub trait CatalogClient: Send + Sync {
    fn fetch_catalog(&self, url: &str) -> Result<String, InventoryError>;
}

#[derive(Clone)]
pub struct ThreddsHttpClient {
    client: Client,
}

impl ThreddsHttpClient {
    pub fn new() -> Result<Self, InventoryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ccmi-inv/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| InventoryError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| InventoryError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl CatalogClient for ThreddsHttpClient {
    fn fetch_catalog(&self, url: &str) -> Result<String, InventoryError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| InventoryError::Listing {
                container: url.to_string(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(InventoryError::Listing {
                container: url.to_string(),
                message: format!("status {}", response.status().as_u16()),
            });
        }
        response.text().map_err(|err| InventoryError::Listing {
            container: url.to_string(),
            message: err.to_string(),
        })
    }
}

/// Lists a THREDDS catalog tree rooted at `root_url`.
pub struct ThreddsLister<C: CatalogClient> {
    client: C,
    root_url: String,
}

impl<C: CatalogClient> ThreddsLister<C> {
    pub fn new(client: C, root_url: &str) -> Self {
        let mut root_url = root_url.trim().to_string();
        if !root_url.ends_with('/') {
            root_url.push('/');
        }
        Self { client, root_url }
    }

    pub fn catalog_url(&self, path: &RemotePath) -> String {
        if path.is_root() {
            format!("{}{CATALOG_DOCUMENT}", self.root_url)
        } else {
            format!("{}{}/{CATALOG_DOCUMENT}", self.root_url, path)
        }
    }

    fn query(&self, path: &RemotePath, query: CatalogQuery) -> Result<Vec<String>, InventoryError> {
        let url = self.catalog_url(path);
        let body = self.client.fetch_catalog(&url)?;
        extract_attributes(&body, query).map_err(|message| InventoryError::MalformedResponse {
            container: url,
            message,
        })
    }
}

impl<C: CatalogClient> DirectoryLister for ThreddsLister<C> {
    fn list(&self, path: &RemotePath) -> Result<Vec<ListingEntry>, InventoryError> {
        Ok(self
            .query(path, CONTAINER_QUERY)?
            .into_iter()
            .map(ListingEntry::container)
            .collect())
    }

    fn list_files(&self, path: &RemotePath) -> Result<Vec<String>, InventoryError> {
        self.query(path, FILE_QUERY)
    }

    fn describe(&self, path: &RemotePath) -> String {
        self.catalog_url(path)
    }
}

/// Reads `query.attribute` from every `child_tag` element that sits directly
/// under a `container_tag` element directly under the document root, both in
/// the THREDDS namespace. Matching children without the attribute are
/// skipped.
pub fn extract_attributes(xml: &str, query: CatalogQuery) -> Result<Vec<String>, String> {
    let mut reader = NsReader::from_str(xml);
    let mut values = Vec::new();
    let mut depth = 0usize;
    let mut in_container = false;
    let mut saw_root = false;

    loop {
        let (ns, event) = reader.read_resolved_event().map_err(|err| err.to_string())?;
        let in_thredds = is_bound_to(&ns, THREDDS_NS);
        match event {
            Event::Start(element) => {
                saw_root = true;
                if depth == 1 {
                    in_container = in_thredds && local_is(&element, query.container_tag);
                } else if depth == 2 && in_container && in_thredds {
                    collect_attribute(&reader, &element, query, &mut values)?;
                }
                depth += 1;
            }
            Event::Empty(element) => {
                saw_root = true;
                if depth == 2 && in_container && in_thredds {
                    collect_attribute(&reader, &element, query, &mut values)?;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 1 {
                    in_container = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err("document has no root element".to_string());
    }
    Ok(values)
}

fn is_bound_to(ns: &ResolveResult, expected: &[u8]) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(bound)) if *bound == expected)
}

fn local_is(element: &BytesStart, tag: &str) -> bool {
    element.local_name().as_ref() == tag.as_bytes()
}

fn collect_attribute(
    reader: &NsReader<&[u8]>,
    element: &BytesStart,
    query: CatalogQuery,
    values: &mut Vec<String>,
) -> Result<(), String> {
    if !local_is(element, query.child_tag) {
        return Ok(());
    }
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|err| err.to_string())?;
        let (ns, local) = reader.resolve_attribute(attribute.key);
        let ns_matches = match query.attribute_ns {
            Some(expected) => is_bound_to(&ns, expected),
            None => matches!(ns, ResolveResult::Unbound),
        };
        if ns_matches && local.as_ref() == query.attribute.as_bytes() {
            let value = attribute.unescape_value().map_err(|err| err.to_string())?;
            values.push(value.into_owned());
            break;
        }
    }
    Ok(())
}
