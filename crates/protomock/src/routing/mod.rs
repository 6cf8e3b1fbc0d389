//! Filesystem-derived routing.
//!
//! The directory layout of the mocks tree is the routing table:
//!
//! ```text
//! http/users/GET.js                        GET  /users
//! http/users/__user_id/GET.js              GET  /users/:user_id
//! grpc/example/ExampleService/SayHello.js  /example.ExampleService/SayHello
//! ```

mod matcher;
mod segment;
mod source;
mod table;

pub use matcher::RouteMatch;
pub use segment::{Segment, PARAM_PREFIX};
pub use source::{DirectorySource, MockSource, SourceFile, SourceTree, SCRIPT_EXTENSION};
pub use table::{MockRoute, RouteInfo, RouteMatcher, RouteTable, HTTP_METHODS};
