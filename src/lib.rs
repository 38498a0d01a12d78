//! Headless selection analysis for research-assistant project pages.
//!
//! A page holds analysis sections (trigger, extractable text, result
//! container). Activating a section posts the trimmed selection to
//! `/research-assistant/project/{id}/analyze` and replaces the result
//! container with the returned summary and research topics, or with a
//! generic failure message.

pub mod handler;
pub mod page;
pub mod protocol;
pub mod render;
pub mod section;
pub mod transport;

pub use handler::{ActivationOutcome, AnalysisHandler, AnalyzeError, ConfigError, SectionBinding};
pub use page::{Page, PageContext, PageSection, ProjectId, SecurityToken, project_id_from_path};
pub use protocol::{AnalysisRequest, AnalysisResponse};
pub use section::{Notifier, ResultSlot, ResultTarget, SectionDescriptor, TriggerControl};
#[cfg(feature = "http")]
pub use transport::{ClientConfig, HttpTransport};
pub use transport::{OutgoingRequest, Transport, TransportError, TransportResponse};
