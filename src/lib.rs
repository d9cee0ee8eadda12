//! Markup generation with named sections that can be regenerated on
//! their own, and event handlers that are attached through a shared
//! delegation table instead of per element listeners.

pub use asection;

pub mod warn;
pub mod boxed_error;
pub mod config;
pub mod template;
pub mod writer;
pub mod walk;

pub use config::WriterOptions;
pub use template::Template;
pub use writer::{MarkupWriter, RenderedSection, SectionState, WriterError, WriterErrorKind};
