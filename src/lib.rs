pub mod args;
pub mod batch;
pub mod config;
pub mod error;
pub mod loader;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod templates;

pub use resolver::Resolver;

pub mod prelude {
    pub use crate::args::ArgStore;
    pub use crate::batch::{run_batch, BatchReport, QueryDef};
    pub use crate::config::Config;
    pub use crate::error::*;
    pub use crate::resolver::{ResolvedQuery, Resolver, Status};
    pub use crate::scanner::scan;
    pub use crate::templates::TemplateRegistry;
}
