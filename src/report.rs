// src/report.rs
//! Plain-text and HTML renderings of a [`ReportPayload`] for notifiers.

use std::fmt::Write as _;

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::model::{ReportPayload, StatisticsRecord};

const NO_FINDINGS: &str = "No new findings";

pub fn subject(report: &ReportPayload) -> String {
    format!("Keyword monitor report - {}", report.date)
}

pub fn render_text(report: &ReportPayload) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Keyword monitor report");
    let _ = writeln!(out, "Date: {}", report.date);
    let _ = writeln!(out);
    let _ = writeln!(out, "Keywords: {}", report.keywords.join(", "));
    let _ = writeln!(out);
    let _ = writeln!(out, "New findings:");
    if report.findings.is_empty() {
        let _ = writeln!(out, "{NO_FINDINGS}");
    }
    for f in &report.findings {
        let _ = writeln!(out, "- {}", f.title);
        let _ = writeln!(out, "  Source: {}", f.source);
        let _ = writeln!(out, "  Time: {}", f.time);
        let _ = writeln!(out, "  Link: {}", f.url);
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "Statistics:");
    for (k, v) in statistics_lines(&report.statistics) {
        let _ = writeln!(out, "{k}: {v}");
    }
    out
}

pub fn render_html(report: &ReportPayload) -> String {
    let mut out = String::from("<html><body>");
    let _ = write!(out, "<h1>Keyword monitor report</h1><p>Date: {}</p>", report.date);
    let _ = write!(
        out,
        "<h2>Keywords</h2><p>{}</p>",
        encode_text(&report.keywords.join(", "))
    );

    out.push_str("<h2>New findings</h2>");
    if report.findings.is_empty() {
        let _ = write!(out, "<p>{NO_FINDINGS}</p>");
    } else {
        out.push_str("<ul>");
        for f in &report.findings {
            let _ = write!(
                out,
                "<li><a href=\"{}\"><strong>{}</strong></a><br>Source: {}<br>Time: {}</li>",
                encode_double_quoted_attribute(&f.url),
                encode_text(&f.title),
                encode_text(&f.source),
                encode_text(&f.time),
            );
        }
        out.push_str("</ul>");
    }

    out.push_str("<h2>Statistics</h2><ul>");
    for (k, v) in statistics_lines(&report.statistics) {
        let _ = write!(out, "<li><strong>{}:</strong> {}</li>", k, encode_text(&v));
    }
    out.push_str("</ul></body></html>");
    out
}

fn statistics_lines(s: &StatisticsRecord) -> Vec<(&'static str, String)> {
    let per_keyword = s
        .keyword_stats
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    vec![
        ("total_findings", s.total_findings.to_string()),
        ("sources_count", s.sources_count.to_string()),
        ("keywords_count", s.keywords_count.to_string()),
        ("keyword_stats", per_keyword),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::finding;
    use chrono::NaiveDate;

    fn payload(findings: Vec<crate::model::Finding>) -> ReportPayload {
        ReportPayload {
            date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            keywords: vec!["NearLink".into()],
            statistics: StatisticsRecord::from_findings(&findings),
            findings,
        }
    }

    #[test]
    fn html_escapes_titles_and_urls() {
        let p = payload(vec![finding("<script>x</script>", "https://e.x/?a=1&b=\"2\"", "e.x", "NearLink")]);
        let html = render_html(&p);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("&quot;2&quot;"));
    }

    #[test]
    fn text_lists_findings_and_stats() {
        let p = payload(vec![finding("Title A", "https://e.x/a", "e.x", "NearLink")]);
        let text = render_text(&p);
        assert!(text.contains("- Title A"));
        assert!(text.contains("total_findings: 1"));
        assert!(text.contains("keyword_stats: NearLink=1"));
    }

    #[test]
    fn empty_report_has_placeholder() {
        let p = payload(vec![]);
        assert!(render_text(&p).contains(NO_FINDINGS));
        assert!(render_html(&p).contains(NO_FINDINGS));
        assert_eq!(subject(&p), "Keyword monitor report - 2025-03-01");
    }
}
