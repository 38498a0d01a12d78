use askama::Template;

use crate::protocol::AnalysisResponse;

pub const ANALYZING_PLACEHOLDER: &str = "Analyzing...";
pub const EMPTY_SELECTION_NOTICE: &str = "Please select some text to analyze.";
pub const FAILURE_MESSAGE: &str = "An error occurred while analyzing the text.";

#[derive(Template)]
#[template(
    source = r#"<h3>Summary</h3>
<p>{{ summary }}</p>
<h3>Research Topics</h3>
<ol>
{%- for topic in topics %}
  <li>{{ topic }}</li>
{%- endfor %}
</ol>"#,
    ext = "html"
)]
struct ResultFragment<'a> {
    summary: &'a str,
    topics: &'a [String],
}

/// Markup placed in a section's result container after a successful analysis.
pub fn render_result(response: &AnalysisResponse) -> askama::Result<String> {
    ResultFragment {
        summary: &response.summary,
        topics: &response.research_topics,
    }
    .render()
}

/// Same content as `render_result`, as Markdown for terminal display.
pub fn render_terminal_markdown(response: &AnalysisResponse) -> String {
    let mut out = String::from("## Summary\n\n");
    out.push_str(response.summary.trim());
    out.push_str("\n\n## Research Topics\n\n");
    if response.research_topics.is_empty() {
        out.push_str("_none_\n");
    }
    for (position, topic) in response.research_topics.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", position + 1, topic.trim()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(summary: &str, topics: &[&str]) -> AnalysisResponse {
        AnalysisResponse {
            summary: summary.to_string(),
            research_topics: topics.iter().map(|topic| topic.to_string()).collect(),
        }
    }

    #[test]
    fn renders_summary_and_ordered_topics() {
        let html = render_result(&response("S", &["A", "B"])).unwrap();
        assert!(html.contains("<h3>Summary</h3>"));
        assert!(html.contains("<p>S</p>"));
        assert!(html.contains("<h3>Research Topics</h3>"));
        assert_eq!(html.matches("<li>").count(), 2);
        let a = html.find("<li>A</li>").unwrap();
        let b = html.find("<li>B</li>").unwrap();
        assert!(a < b);
    }

    #[test]
    fn empty_topics_render_an_empty_list() {
        let html = render_result(&response("S", &[])).unwrap();
        assert!(html.contains("<ol>"));
        assert!(html.contains("</ol>"));
        assert_eq!(html.matches("<li>").count(), 0);
    }

    #[test]
    fn server_text_is_escaped() {
        let html = render_result(&response("<script>x</script>", &["a & b"])).unwrap();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a &amp; b"));
    }

    #[test]
    fn terminal_markdown_numbers_topics() {
        let text = render_terminal_markdown(&response(" S ", &["A", "B"]));
        assert!(text.starts_with("## Summary\n\nS\n"));
        assert!(text.contains("1. A\n2. B\n"));
    }
}
