//! HTTP request handlers.
//!
//! Handlers work on an already-read request (method, URL, body) and return
//! a [`Reply`]; the server turns that into a tiny_http response.

use packer::{CatalogStore, PackCalculator, PackCatalog, PackingError, DEFAULT_MAX_HORIZON};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tiny_http::Method;

use crate::model::{CalculateRequest, CalculateResponse, UpdatePackSizes};

const ROUTES: [&str; 4] = ["/ping", "/packs", "/update-package-sizes", "/calculate-best-packages"];

/// Status, content type and body of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: message.as_bytes().to_vec(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Vec::new(),
        }
    }

    /// Pretty-printed JSON body; falls back to a 500 if serialization fails.
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        match serde_json::to_vec_pretty(body) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                log::error!("Failed to marshal json response: {}", e);
                Self::text(500, "internal server error")
            }
        }
    }
}

/// Bounds applied to incoming requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_order: i64,
    pub max_horizon: u64,
    pub max_pack_sizes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_order: 1_000_000,
            max_horizon: DEFAULT_MAX_HORIZON,
            max_pack_sizes: 32,
        }
    }
}

impl Limits {
    /// Check that every order up to `max_order` stays within `max_horizon`
    /// against `catalog`.
    pub fn check_catalog(&self, catalog: &PackCatalog) -> Result<(), PackingError> {
        let count = catalog.sizes().len();
        if count > self.max_pack_sizes {
            return Err(PackingError::TooManyPackSizes {
                count,
                max: self.max_pack_sizes,
            });
        }

        let largest = catalog.largest();
        let fits = u64::try_from(self.max_order)
            .ok()
            .and_then(|max_order| max_order.checked_add(largest))
            .is_some_and(|horizon| horizon <= self.max_horizon);
        if !fits {
            return Err(PackingError::PackTooLargeForHorizon {
                largest,
                max_order: self.max_order,
                max_horizon: self.max_horizon,
            });
        }
        Ok(())
    }
}

pub struct Handler {
    catalog: Arc<CatalogStore>,
    calculator: Arc<dyn PackCalculator>,
    limits: Limits,
}

impl Handler {
    pub fn new(catalog: Arc<CatalogStore>, calculator: Arc<dyn PackCalculator>, limits: Limits) -> Self {
        Self {
            catalog,
            calculator,
            limits,
        }
    }

    /// Route a request to its handler.
    pub fn handle(&self, request_id: &str, method: &Method, url: &str, body: &[u8]) -> Reply {
        let (path, _query) = parse_url(url);

        if *method == Method::Options {
            return Reply::empty(204);
        }

        match (method, path) {
            (Method::Get, "/ping") => Reply::text(200, "pong"),
            (Method::Get, "/packs") => self.packs(),
            (Method::Post, "/update-package-sizes") => self.update_package_sizes(request_id, body),
            (Method::Post, "/calculate-best-packages") => self.calculate_best_packages(request_id, body),
            (_, path) if ROUTES.contains(&path) => Reply::text(405, "method not allowed"),
            _ => Reply::text(404, "not found"),
        }
    }

    /// Compute the packs for an order against the current catalog.
    pub fn calculate_best_packages(&self, request_id: &str, body: &[u8]) -> Reply {
        let request: CalculateRequest = match parse_body(request_id, body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };

        if let Err(e) = self.check_order(request.order) {
            return client_error(request_id, e);
        }

        let snapshot = self.catalog.snapshot();
        log::debug!(
            "[{}] order {} against catalog version {}",
            request_id,
            request.order,
            snapshot.version
        );

        match self.calculator.calculate(request.order, &snapshot.catalog) {
            Ok(packages) => Reply::json(200, &CalculateResponse { packages }),
            Err(e @ PackingError::HorizonTooLarge { .. }) => client_error(request_id, e),
            Err(e) => {
                log::error!("[{}] failed to calculate packs: {}", request_id, e);
                Reply::text(500, &e.to_string())
            }
        }
    }

    /// Replace the pack catalog.
    pub fn update_package_sizes(&self, request_id: &str, body: &[u8]) -> Reply {
        let request: UpdatePackSizes = match parse_body(request_id, body) {
            Ok(request) => request,
            Err(reply) => return reply,
        };

        let catalog = match PackCatalog::new(request.sizes) {
            Ok(catalog) => catalog,
            Err(e) => return client_error(request_id, e),
        };
        if let Err(e) = self.limits.check_catalog(&catalog) {
            return client_error(request_id, e);
        }

        let snapshot = self.catalog.install(catalog);
        Reply::json(200, &sizes_body(snapshot.catalog.sizes()))
    }

    pub fn packs(&self) -> Reply {
        let snapshot = self.catalog.snapshot();
        Reply::json(200, &sizes_body(snapshot.catalog.sizes()))
    }

    fn check_order(&self, order: i64) -> Result<(), PackingError> {
        if order <= 0 {
            return Err(PackingError::InvalidOrder { order });
        }
        if order > self.limits.max_order {
            return Err(PackingError::OrderTooLarge {
                order,
                max: self.limits.max_order,
            });
        }
        Ok(())
    }
}

/// Parse URL into path and query string
fn parse_url(url: &str) -> (&str, &str) {
    match url.find('?') {
        Some(pos) => (&url[..pos], &url[pos + 1..]),
        None => (url, ""),
    }
}

fn parse_body<T: DeserializeOwned>(request_id: &str, body: &[u8]) -> Result<T, Reply> {
    serde_json::from_slice(body).map_err(|e| {
        log::warn!("[{}] failed to parse request: {}", request_id, e);
        Reply::text(400, &format!("invalid request body: {}", e))
    })
}

fn client_error(request_id: &str, error: PackingError) -> Reply {
    log::warn!("[{}] rejected request: {}", request_id, error);
    Reply::text(400, &error.to_string())
}

fn sizes_body(sizes: &[u64]) -> UpdatePackSizes {
    UpdatePackSizes {
        sizes: sizes.iter().map(|&size| size as i64).collect(),
    }
}
