//! Page-level inputs: the project id from the location path, the CSRF token
//! from page metadata, and discovery of analysis sections in page markup.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::section::{MissingParts, ResultSlot, ResultTarget, SectionDescriptor, TriggerControl};

static SECTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".analysis-section").expect("valid section selector"));
static TRIGGER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".analyze-text-button").expect("valid trigger selector"));
static SOURCE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".extracted-text").expect("valid source selector"));
static RESULT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".analysis-result").expect("valid result selector"));
static CSRF_META_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="csrf-token"]"#).expect("valid meta selector"));

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecurityToken(String);

impl SecurityToken {
    /// Returns `None` for an empty value so an empty header is never sent.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecurityToken(..)")
    }
}

/// Takes the path segment following the first literal `project` segment.
pub fn project_id_from_path(path: &str) -> Option<ProjectId> {
    let mut segments = path.split('/');
    segments.find(|segment| *segment == "project")?;
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .map(ProjectId::new)
}

/// Page-wide values the handler needs, derived once and passed in explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub project_id: Option<ProjectId>,
    pub security_token: Option<SecurityToken>,
}

impl PageContext {
    pub fn new(project_id: Option<ProjectId>, security_token: Option<SecurityToken>) -> Self {
        Self {
            project_id,
            security_token,
        }
    }

    pub fn from_page(path: &str, page: &Page) -> Self {
        Self {
            project_id: project_id_from_path(path),
            security_token: page.security_token.clone(),
        }
    }
}

/// A qualifying section discovered in page markup.
#[derive(Debug, Clone)]
pub struct PageSection {
    /// Position among all `.analysis-section` elements, skipped ones included.
    pub index: usize,
    pub descriptor: SectionDescriptor,
}

impl PageSection {
    /// Current markup of the section's result container.
    pub fn result_content(&self) -> String {
        self.descriptor.result.content()
    }
}

#[derive(Debug, Clone)]
pub struct SkippedSection {
    pub index: usize,
    pub missing: MissingParts,
}

/// Owned snapshot of a parsed page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub security_token: Option<SecurityToken>,
    pub sections: Vec<PageSection>,
    pub skipped: Vec<SkippedSection>,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let security_token = document
            .select(&CSRF_META_SELECTOR)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .and_then(SecurityToken::new);

        let mut page = Page {
            security_token,
            ..Page::default()
        };
        for (index, element) in document.select(&SECTION_SELECTOR).enumerate() {
            let result = element
                .select(&RESULT_SELECTOR)
                .next()
                .map(|result| Arc::new(ResultSlot::new(result.inner_html())) as Arc<dyn ResultTarget>);
            let trigger = element.select(&TRIGGER_SELECTOR).next().map(trigger_control);
            let source = element.select(&SOURCE_SELECTOR).next().map(element_text);

            match SectionDescriptor::assemble(trigger, source, result) {
                Ok(descriptor) => page.sections.push(PageSection { index, descriptor }),
                Err(missing) => {
                    debug!(index, %missing, "skipping analysis section");
                    page.skipped.push(SkippedSection { index, missing });
                }
            }
        }
        debug!(
            qualifying = page.sections.len(),
            skipped = page.skipped.len(),
            token = page.security_token.is_some(),
            "parsed page"
        );
        page
    }

    pub fn section(&self, index: usize) -> Option<&PageSection> {
        self.sections.iter().find(|section| section.index == index)
    }

    /// Every section in document order, ready for `AnalysisHandler::bind`.
    pub fn candidates(&self) -> Vec<Result<SectionDescriptor, MissingParts>> {
        let mut all: Vec<(usize, Result<SectionDescriptor, MissingParts>)> = self
            .sections
            .iter()
            .map(|section| (section.index, Ok(section.descriptor.clone())))
            .chain(
                self.skipped
                    .iter()
                    .map(|skipped| (skipped.index, Err(skipped.missing.clone()))),
            )
            .collect();
        all.sort_by_key(|(index, _)| *index);
        all.into_iter().map(|(_, candidate)| candidate).collect()
    }
}

fn trigger_control(element: ElementRef<'_>) -> TriggerControl {
    let attrs = element.value();
    TriggerControl {
        analysis_id: attrs.attr("data-analysis-id").unwrap_or_default().to_string(),
        education_level: attrs.attr("data-education-level").map(str::to_string),
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
