//! Result validation and HTTP rendering.

mod builder;
mod mapper;

pub use builder::{
    error_response, json_response, mock_response, not_found, text_response, ResponseBuilder,
    JSON_CONTENT_TYPE, TEXT_CONTENT_TYPE,
};
pub use mapper::map_result;
