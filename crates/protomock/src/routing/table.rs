use super::segment::{self, Segment};
use super::source::{SourceFile, SourceTree, SCRIPT_EXTENSION};
use crate::errors::LoadError;
use crate::model::Protocol;
use crate::scripting::CompiledScript;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// HTTP verbs a script file may be named after.
pub const HTTP_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "TRACE", "CONNECT",
];

/// What a route answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMatcher {
    MethodPath { method: String },
    ServiceRpc { service: String, method: String },
}

/// One script bound to one route.
#[derive(Debug, Clone)]
pub struct MockRoute {
    pub protocol: Protocol,
    pub matcher: RouteMatcher,
    /// Path pattern for HTTP routes; empty for RPC routes.
    pub segments: Vec<Segment>,
    pub script: CompiledScript,
}

impl MockRoute {
    /// Pattern as shown in listings: `/users/:user_id` or `/pkg.Service/Method`.
    pub fn pattern(&self) -> String {
        match &self.matcher {
            RouteMatcher::MethodPath { .. } => segment::pattern(&self.segments),
            RouteMatcher::ServiceRpc { service, method } => format!("/{service}/{method}"),
        }
    }

    pub fn method(&self) -> &str {
        match &self.matcher {
            RouteMatcher::MethodPath { method } | RouteMatcher::ServiceRpc { method, .. } => method,
        }
    }
}

/// Serializable summary of a route for listings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RouteInfo {
    pub protocol: Protocol,
    pub method: String,
    pub pattern: String,
    pub script: String,
}

/// Trie node for HTTP paths. At most one dynamic child per node.
#[derive(Debug, Default)]
pub(super) struct Node {
    pub(super) statics: HashMap<String, Node>,
    pub(super) param: Option<(String, Box<Node>)>,
    pub(super) methods: HashMap<String, Arc<MockRoute>>,
}

/// Immutable set of routes built from one mocks tree.
///
/// Lookups never mutate the table; a reload builds a new one.
#[derive(Debug, Default)]
pub struct RouteTable {
    pub(super) http: Node,
    /// Fully-qualified service name, then method name.
    pub(super) rpc: HashMap<String, HashMap<String, Arc<MockRoute>>>,
    routes: Vec<Arc<MockRoute>>,
}

impl RouteTable {
    /// Build a table from every script in `tree`.
    ///
    /// Files outside `http/` and `grpc/`, and files without a `.js`
    /// extension, are ignored. Any malformed entry fails the whole build.
    pub fn build(tree: &SourceTree) -> Result<Self, LoadError> {
        let mut files: Vec<&SourceFile> = tree.files().iter().collect();
        files.sort_by(|a, b| a.components.cmp(&b.components));

        let mut table = RouteTable::default();
        for file in files {
            let Some((protocol, dirs, stem)) = classify(file) else {
                tracing::debug!(path = %file.display_path(), "Ignoring file outside the mock layout");
                continue;
            };
            match protocol {
                Protocol::Http => table.insert_http(file, dirs, stem)?,
                Protocol::Grpc => table.insert_rpc(file, dirs, stem)?,
            }
        }
        Ok(table)
    }

    fn insert_http(&mut self, file: &SourceFile, dirs: &[String], stem: &str) -> Result<(), LoadError> {
        let path = file.display_path();
        let method = stem.to_ascii_uppercase();
        if !HTTP_METHODS.contains(&method.as_str()) {
            return Err(LoadError::UnknownMethod {
                path,
                stem: stem.to_string(),
            });
        }

        let mut segments = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let segment = Segment::parse(dir).ok_or_else(|| LoadError::InvalidParam {
                path: path.clone(),
                segment: dir.clone(),
            })?;
            if let Segment::Param(name) = &segment {
                if segments.iter().any(|s| matches!(s, Segment::Param(n) if n == name)) {
                    return Err(LoadError::DuplicateParam {
                        path,
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }

        let mut node = &mut self.http;
        for segment in &segments {
            node = match segment {
                Segment::Static(literal) => node.statics.entry(literal.clone()).or_default(),
                Segment::Param(name) => {
                    let (existing, child) = node
                        .param
                        .get_or_insert_with(|| (name.clone(), Box::default()));
                    if *existing != *name {
                        return Err(LoadError::AmbiguousParams {
                            path,
                            name: name.clone(),
                            existing: existing.clone(),
                        });
                    }
                    child.as_mut()
                }
            };
        }

        if let Some(existing) = node.methods.get(&method) {
            return Err(LoadError::DuplicateRoute {
                path,
                existing: existing.script.id().to_string(),
            });
        }

        let route = Arc::new(MockRoute {
            protocol: Protocol::Http,
            matcher: RouteMatcher::MethodPath {
                method: method.clone(),
            },
            segments,
            script: compile(file, &path)?,
        });
        node.methods.insert(method, Arc::clone(&route));
        self.routes.push(route);
        Ok(())
    }

    fn insert_rpc(&mut self, file: &SourceFile, dirs: &[String], stem: &str) -> Result<(), LoadError> {
        let path = file.display_path();
        if dirs.iter().any(|d| d.starts_with(segment::PARAM_PREFIX)) {
            return Err(LoadError::DynamicRpcSegment { path });
        }
        if dirs.is_empty() || stem.is_empty() {
            return Err(LoadError::InvalidRpcPath { path });
        }

        let service = dirs.join(".");
        let methods = self.rpc.entry(service.clone()).or_default();
        if let Some(existing) = methods.get(stem) {
            return Err(LoadError::DuplicateRoute {
                path,
                existing: existing.script.id().to_string(),
            });
        }

        let route = Arc::new(MockRoute {
            protocol: Protocol::Grpc,
            matcher: RouteMatcher::ServiceRpc {
                service,
                method: stem.to_string(),
            },
            segments: Vec::new(),
            script: compile(file, &path)?,
        });
        methods.insert(stem.to_string(), Arc::clone(&route));
        self.routes.push(route);
        Ok(())
    }

    /// Every route, sorted by protocol, pattern and method.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let mut infos: Vec<RouteInfo> = self
            .routes
            .iter()
            .map(|route| RouteInfo {
                protocol: route.protocol,
                method: route.method().to_string(),
                pattern: route.pattern(),
                script: route.script.id().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| {
            (a.protocol, &a.pattern, &a.method).cmp(&(b.protocol, &b.pattern, &b.method))
        });
        infos
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route counts per protocol.
    pub fn counts(&self) -> BTreeMap<Protocol, usize> {
        let mut counts = BTreeMap::from([(Protocol::Http, 0), (Protocol::Grpc, 0)]);
        for route in &self.routes {
            *counts.entry(route.protocol).or_default() += 1;
        }
        counts
    }
}

/// Split a file into protocol, directory components and file stem.
fn classify(file: &SourceFile) -> Option<(Protocol, &[String], &str)> {
    let (name, rest) = file.components.split_last()?;
    let (top, dirs) = rest.split_first()?;
    let protocol = Protocol::from_dir_name(top)?;
    let stem = name.strip_suffix(SCRIPT_EXTENSION)?.strip_suffix('.')?;
    Some((protocol, dirs, stem))
}

fn compile(file: &SourceFile, path: &str) -> Result<CompiledScript, LoadError> {
    CompiledScript::compile(path, Arc::clone(&file.contents)).map_err(|e| LoadError::Compile {
        path: path.to_string(),
        message: e.to_string(),
    })
}
