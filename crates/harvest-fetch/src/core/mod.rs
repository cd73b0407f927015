//! Pure transformations: retry classification, status and header parsing.

mod retry;
mod validation;

pub use retry::RetryPolicy;
pub use validation::{
    filename_from_url, is_redirect, parse_content_range_start, range_header, url_authority,
};
