#![forbid(unsafe_code)]

//! Pure text-level stages of the synthesis pipeline: splitting a streamed
//! model response into plan and code, legalizing truncated markup fragments,
//! and the markup ⇄ [`fc_core::Document`] codec.

mod legalize;
mod markup;
mod response;
mod scan;

pub use legalize::{WRAPPER_CLOSE, WRAPPER_OPEN, legalize};
pub use markup::{MarkupError, parse_markup, write_markup};
pub use response::{PLAN_CLOSE, PLAN_OPEN, ParsedResponse, parse_response};
