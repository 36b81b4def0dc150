//! Mining job sources.
//!
//! A job source is where work comes from: a pool speaking Stratum v1 today,
//! other protocols later. Sources run as independent tasks and talk to their
//! coordinator through the return-addressed envelope types in [`messages`]:
//! events flow out ([`SourceEvent`]), commands flow back in
//! ([`SourceCommand`]), and a [`SourceHandle`] serves as the return address.
//!
//! The device layer never touches protocol state. It consumes
//! [`JobTemplate`]s and produces [`Share`]s; everything between those two
//! types is the source's problem.

mod job;
mod messages;

pub mod stratum_v1;

pub use job::{JobTemplate, Share};
pub use messages::{SourceCommand, SourceEvent, SourceHandle};
