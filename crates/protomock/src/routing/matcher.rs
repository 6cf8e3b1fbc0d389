use super::table::{MockRoute, RouteTable};
use crate::model::{BoundParams, IncomingRequest, Target};
use std::borrow::Cow;
use std::sync::Arc;

/// A resolved route and the parameters bound while walking to it.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<MockRoute>,
    pub params: BoundParams,
}

impl RouteTable {
    /// Find the route for `request`, or `None` when nothing matches.
    pub fn resolve(&self, request: &IncomingRequest) -> Option<RouteMatch> {
        match &request.target {
            Target::Http { method, path } => self.resolve_http(method, path),
            Target::Rpc { service, method } => self.resolve_rpc(service, method),
        }
    }

    /// Walk the path trie one segment at a time.
    ///
    /// A static child always wins over the dynamic one and the walk never
    /// backtracks, so `/users/new` hits `users/new/` even when only
    /// `users/__id/` defines the requested method.
    pub fn resolve_http(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut node = &self.http;
        let mut params = BoundParams::new();

        for raw in path.split('/').filter(|s| !s.is_empty()) {
            let segment = decode_segment(raw);
            if let Some(child) = node.statics.get(&*segment) {
                node = child;
                continue;
            }
            let (name, child) = node.param.as_ref()?;
            params.insert(name.clone(), segment.into_owned());
            node = child;
        }

        let route = node.methods.get(method.to_ascii_uppercase().as_str())?;
        Some(RouteMatch {
            route: Arc::clone(route),
            params,
        })
    }

    /// Two exact lookups: fully-qualified service, then method.
    pub fn resolve_rpc(&self, service: &str, method: &str) -> Option<RouteMatch> {
        let route = self.rpc.get(service)?.get(method)?;
        Some(RouteMatch {
            route: Arc::clone(route),
            params: BoundParams::new(),
        })
    }
}

fn decode_segment(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}
