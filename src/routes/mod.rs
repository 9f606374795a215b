pub mod common;
pub mod print;
pub mod resource;

pub use common::common_routes;
pub use print::{print_routes, HtmlPrintRenderer, PrintRenderer};
pub use resource::resource_routes;
