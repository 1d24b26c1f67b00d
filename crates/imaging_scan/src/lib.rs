//! Calcium-imaging scan discovery and metadata ingestion.
//!
//! Flow: [`ScanModule::auto_generate_scan`] inserts one Scan row per raw-data
//! directory of a session; [`ScanModule::ingest`] (or [`ScanModule::populate`]
//! for every pending scan) reads the raw files through the parser registered
//! for the scan's acquisition software and stores ScanInfo, Field and
//! ScanFile rows.
//!
//! Where raw data lives is answered by an [`ImagingLink`] injected at
//! construction; [`DirectoryLink`] covers the common
//! `<root>/<subject>/<session>/<scan>/` layout.
//!
//! ```rust,ignore
//! let db = ImagingDb::open(&config.database_path).await?;
//! let link = Arc::new(DirectoryLink::new(config));
//! let module = ScanModule::new(db, link, ParserRegistry::with_builtin_readers());
//!
//! module.auto_generate_scan(&session, &AutoGenerateOptions::default()).await?;
//! let report = module.populate().await?;
//! ```

pub mod autogen;
pub mod config;
pub mod discover;
pub mod error;
pub mod ingest;
pub mod link;
pub mod paths;
pub mod readers;

pub use autogen::{AutoGenerateOptions, AutoGenerateReport, SkippedScan};
pub use config::ImagingConfig;
pub use error::{Result, ScanError};
pub use ingest::{
    NikonParser, ParsedScan, ParserRegistry, PopulateFailure, PopulateReport, ScanImageParser,
    ScanModule, ScanParser, ScanboxParser,
};
pub use link::{DirectoryLink, ImagingLink};
