//! Typed contract between the page and the analysis handler.
//!
//! A section is a trigger control, a container of extractable text and a
//! result container. The handler only ever writes to the result container.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Attributes carried by a section's analyze trigger.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TriggerControl {
    pub analysis_id: String,
    pub education_level: Option<String>,
}

impl TriggerControl {
    pub fn new(analysis_id: impl Into<String>) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            education_level: None,
        }
    }

    pub fn with_education_level(mut self, level: impl Into<String>) -> Self {
        self.education_level = Some(level.into());
        self
    }
}

/// The part of a section whose content the handler replaces.
pub trait ResultTarget: Send + Sync {
    fn replace_content(&self, html: String);

    fn content(&self) -> String;
}

/// Presents a blocking notice to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// In-memory result container, cheap to clone and shared with whoever displays it.
#[derive(Clone, Default)]
pub struct ResultSlot {
    inner: Arc<RwLock<String>>,
}

impl ResultSlot {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.into())),
        }
    }
}

impl ResultTarget for ResultSlot {
    fn replace_content(&self, html: String) {
        *self.inner.write() = html;
    }

    fn content(&self) -> String {
        self.inner.read().clone()
    }
}

impl fmt::Debug for ResultSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResultSlot").field(&*self.inner.read()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionPart {
    Trigger,
    SourceText,
    Result,
}

impl fmt::Display for SectionPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionPart::Trigger => write!(f, "trigger"),
            SectionPart::SourceText => write!(f, "source text"),
            SectionPart::Result => write!(f, "result container"),
        }
    }
}

/// Parts a candidate section lacked, in trigger/source/result order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParts(pub Vec<SectionPart>);

impl fmt::Display for MissingParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "missing {}", names.join(", "))
    }
}

/// A qualifying section: all three handles are present.
#[derive(Clone)]
pub struct SectionDescriptor {
    pub trigger: TriggerControl,
    pub source_text: String,
    pub result: Arc<dyn ResultTarget>,
}

impl SectionDescriptor {
    pub fn new(
        trigger: TriggerControl,
        source_text: impl Into<String>,
        result: Arc<dyn ResultTarget>,
    ) -> Self {
        Self {
            trigger,
            source_text: source_text.into(),
            result,
        }
    }

    /// Builds a descriptor only when every part is present.
    pub fn assemble(
        trigger: Option<TriggerControl>,
        source_text: Option<String>,
        result: Option<Arc<dyn ResultTarget>>,
    ) -> Result<Self, MissingParts> {
        match (trigger, source_text, result) {
            (Some(trigger), Some(source_text), Some(result)) => Ok(Self {
                trigger,
                source_text,
                result,
            }),
            (trigger, source_text, result) => {
                let mut missing = Vec::new();
                if trigger.is_none() {
                    missing.push(SectionPart::Trigger);
                }
                if source_text.is_none() {
                    missing.push(SectionPart::SourceText);
                }
                if result.is_none() {
                    missing.push(SectionPart::Result);
                }
                Err(MissingParts(missing))
            }
        }
    }
}

impl fmt::Debug for SectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionDescriptor")
            .field("trigger", &self.trigger)
            .field("source_text", &self.source_text)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_requires_every_part() {
        let slot: Arc<dyn ResultTarget> = Arc::new(ResultSlot::default());
        let missing = SectionDescriptor::assemble(None, Some("text".into()), None).unwrap_err();
        assert_eq!(
            missing.0,
            vec![SectionPart::Trigger, SectionPart::Result]
        );
        assert_eq!(missing.to_string(), "missing trigger, result container");

        let ok = SectionDescriptor::assemble(
            Some(TriggerControl::new("a1")),
            Some("text".into()),
            Some(slot),
        )
        .unwrap();
        assert_eq!(ok.trigger.analysis_id, "a1");
        assert_eq!(ok.source_text, "text");
    }

    #[test]
    fn result_slot_clones_share_content() {
        let slot = ResultSlot::new("<em>initial</em>");
        let view = slot.clone();
        slot.replace_content("updated".to_string());
        assert_eq!(view.content(), "updated");
    }
}
