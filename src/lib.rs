#![warn(missing_docs, missing_debug_implementations)]

//! Find out whether a username is taken on social networks and other sites.
//!
//! A [`Registry`](site::Registry) describes each site: a profile URL
//! template and a detection rule telling how a response reveals whether the
//! account exists. A [`Checker`](check::Checker) requests every site
//! concurrently and classifies each answer as taken, available, or unknown;
//! network failures and timeouts become unknown rather than errors. The
//! resulting [`Report`](report::Report) keeps one result per site, in
//! registry order.
//!
//! # Example
//!
//! ```no_run
//! use socialname::check::{Checker, Classification, Client};
//! use socialname::site::Registry;
//!
//! let registry = Registry::bundled()?;
//! let report = Checker::new(Client::new()).run(&registry, "octocat")?;
//! for result in &report.results {
//!     match result.classification {
//!         Classification::Taken => println!("{}: {}", result.site, result.url),
//!         Classification::Available => println!("{}: free", result.site),
//!         Classification::Unknown => eprintln!("{}: could not tell", result.site),
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod check;
pub mod logging;
pub mod report;
pub mod site;
pub mod username;
