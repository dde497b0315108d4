use anyhow::{Context, Result};
use tracing::info;

use crate::config::ReportConfig;
use crate::locate::{Section, locate};
use crate::metrics::{AnalyticsStore, ProjectMetrics, collect};
use crate::report::{edit_summary, render_report, splice_report};
use crate::wiki::{PageEdit, WikiPageApi, unified_diff};
use crate::window::UtcWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub target: String,
    /// Leading text of the section heading, e.g. `2024-5-10`. The last dated
    /// section is used when absent.
    pub section: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub page_title: String,
    /// Revision the report was spliced into.
    pub base_revision_id: i64,
    pub section: Section,
    pub window: UtcWindow,
    pub metrics: Vec<ProjectMetrics>,
    pub report: String,
    pub new_text: String,
    pub saved: bool,
}

/// Locate the section, collect metrics, render them under the marker line
/// and save the page unless this is a dry run.
pub fn run_report<W, S>(
    config: &ReportConfig,
    request: &ReportRequest,
    wiki: &mut W,
    store: &mut S,
) -> Result<RunOutcome>
where
    W: WikiPageApi,
    S: AnalyticsStore,
{
    let target = config.target(&request.target)?;
    let page = wiki.fetch_page(target.namespace, &target.title)?;

    info!(stage = "locate", title = page.title.as_str(), "locating section");
    let section = locate(&page.content, request.section.as_deref())
        .with_context(|| format!("failed to locate event section on {}", page.title))?;
    let window = UtcWindow::from_local(
        section.date,
        section.start,
        section.end,
        config.time_zone()?,
    )?;

    println!("section: {} ({}-{})", section.date, section.start, section.end);
    println!("window: {} - {} UTC", window.start_stamp(), window.end_stamp());
    println!(
        "users: {}",
        section.users.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    info!(
        stage = "collect",
        projects = config.projects.len(),
        users = section.users.len(),
        "collecting metrics"
    );
    let metrics = collect(
        &config.projects,
        &section.users,
        &window,
        target.content_namespace_only,
        store,
    )?;
    for entry in &metrics {
        println!(
            "{}: {}",
            entry.project.name,
            serde_json::to_string(&entry.metrics).context("failed to encode metrics")?
        );
    }

    info!(stage = "render", "rendering report");
    let report = render_report(&metrics, section.users.len())?;
    let new_text = splice_report(&page.content, section.insertion_offset, &report)?;
    println!("{}", unified_diff(&page.content, &new_text));

    let saved = if request.dry_run {
        info!(stage = "save", "dry run; page left untouched");
        false
    } else {
        info!(
            stage = "save",
            title = page.title.as_str(),
            base_revision = page.revision_id,
            "saving page"
        );
        let summary = edit_summary(&section.date_key);
        wiki.save_page(&PageEdit {
            title: &page.title,
            text: &new_text,
            summary: &summary,
            base_timestamp: Some(&page.timestamp),
            minor: false,
        })
        .with_context(|| format!("failed to save {}", page.title))?;
        true
    };

    Ok(RunOutcome {
        page_title: page.title,
        base_revision_id: page.revision_id,
        section,
        window,
        metrics,
        report,
        new_text,
        saved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::error::ReportError;
    use crate::metrics::tests::MockStore;
    use crate::metrics::{EditSummary, RevisionDelta};
    use crate::wiki::WikiPage;

    const PAGE: &str = "\
== 2024-4-26 ==
Setkání 17:00 – 19:00
Metriky: hotovo

== 2024-5-10 ==
Od 18:00 do 20:30 v kanceláři.
Metriky:
Přítomni: {{U|Alice}}, {{u|jan_Novak}}
";

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct SavedEdit {
        title: String,
        text: String,
        summary: String,
        base_timestamp: Option<String>,
        minor: bool,
    }

    #[derive(Default)]
    struct MockWiki {
        page: Option<WikiPage>,
        fetched: Vec<(i32, String)>,
        saved: Vec<SavedEdit>,
        requests: usize,
    }

    impl MockWiki {
        fn with_page(content: &str) -> Self {
            Self {
                page: Some(WikiPage {
                    title: "Wikipedie:Klub/Praha/2019".to_string(),
                    content: content.to_string(),
                    timestamp: "2024-05-10T19:00:00Z".to_string(),
                    revision_id: 42,
                }),
                ..Default::default()
            }
        }
    }

    impl WikiPageApi for MockWiki {
        fn fetch_page(&mut self, namespace: i32, title: &str) -> Result<WikiPage> {
            self.requests += 1;
            self.fetched.push((namespace, title.to_string()));
            self.page
                .clone()
                .ok_or_else(|| anyhow::anyhow!("page does not exist: {title}"))
        }

        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            self.requests += 1;
            Ok(())
        }

        fn save_page(&mut self, edit: &PageEdit<'_>) -> Result<()> {
            self.requests += 1;
            self.saved.push(SavedEdit {
                title: edit.title.to_string(),
                text: edit.text.to_string(),
                summary: edit.summary.to_string(),
                base_timestamp: edit.base_timestamp.map(ToString::to_string),
                minor: edit.minor,
            });
            Ok(())
        }

        fn request_count(&self) -> usize {
            self.requests
        }
    }

    fn config() -> ReportConfig {
        parse_config(
            r#"
timezone = "Europe/Prague"

[targets.praha]
family = "wikipedia"
lang = "cs"
namespace = 4
title = "Klub/Praha/2019"

[[projects]]
name = "cswiki"
interwiki = "w:cs"

[[projects]]
name = "cswikiquote"
interwiki = "q:cs"
"#,
        )
        .expect("config")
    }

    fn request(dry_run: bool) -> ReportRequest {
        ReportRequest {
            target: "praha".to_string(),
            section: None,
            dry_run,
        }
    }

    fn busy_store() -> MockStore {
        let mut store = MockStore::default();
        store.active.insert("cswiki".to_string(), 1);
        store.new.insert("cswiki".to_string(), 1);
        store.summaries.insert(
            "cswiki".to_string(),
            EditSummary {
                editors: 2,
                pages: 2,
                edits: 3,
            },
        );
        store.deltas.insert(
            "cswiki".to_string(),
            vec![
                RevisionDelta::from_lengths("Alice", Some(1), Some(100), Some(150)),
                RevisionDelta::from_lengths("Alice", Some(1), Some(150), Some(90)),
                RevisionDelta::from_lengths("Jan Novak", Some(0), None, Some(110)),
            ],
        );
        store
    }

    #[test]
    fn run_saves_spliced_report_with_generated_summary() {
        let config = config();
        let mut wiki = MockWiki::with_page(PAGE);
        let mut store = busy_store();

        let outcome = run_report(&config, &request(false), &mut wiki, &mut store).expect("run");

        assert_eq!(wiki.fetched, vec![(4, "Klub/Praha/2019".to_string())]);
        assert_eq!(outcome.base_revision_id, 42);
        assert_eq!(outcome.window.start_stamp(), "20240510160000");
        assert_eq!(outcome.window.end_stamp(), "20240510183000");
        assert_eq!(
            outcome.section.users.iter().cloned().collect::<Vec<_>>(),
            vec!["Alice".to_string(), "Jan Novak".to_string()]
        );
        assert!(outcome.saved);

        let offset = PAGE.find("Metriky:\nPřítomni").expect("marker") + "Metriky:".len();
        assert_eq!(
            outcome.new_text,
            format!(
                "{}{}{}",
                &PAGE[..offset],
                outcome.report.trim_end_matches('\n'),
                &PAGE[offset..]
            )
        );
        assert!(outcome.report.contains("[[:w:cs|cswiki]]"));
        assert!(!outcome.report.contains("cswikiquote"));
        assert_eq!(outcome.metrics[0].metrics.absolute_sum, 220);
        assert_eq!(outcome.metrics[0].metrics.new_pages, 1);

        assert_eq!(
            wiki.saved,
            vec![SavedEdit {
                title: "Wikipedie:Klub/Praha/2019".to_string(),
                text: outcome.new_text.clone(),
                summary: "automaticky generované metriky za den 20240510".to_string(),
                base_timestamp: Some("2024-05-10T19:00:00Z".to_string()),
                minor: false,
            }]
        );
        assert_eq!(wiki.request_count(), 2);
    }

    #[test]
    fn dry_run_renders_without_saving() {
        let config = config();
        let mut wiki = MockWiki::with_page(PAGE);
        let mut store = busy_store();

        let outcome = run_report(&config, &request(true), &mut wiki, &mut store).expect("run");

        assert!(!outcome.saved);
        assert!(wiki.saved.is_empty());
        assert_ne!(outcome.new_text, PAGE);
        assert_eq!(store.calls.len(), 8);
    }

    #[test]
    fn explicit_section_reference_selects_older_event() {
        let config = config();
        let mut wiki = MockWiki::with_page(PAGE);
        let mut store = MockStore::default();
        let request = ReportRequest {
            section: Some("2024-4-26".to_string()),
            ..request(true)
        };

        let outcome = run_report(&config, &request, &mut wiki, &mut store).expect("run");

        assert_eq!(outcome.section.date_key, "20240426");
        assert!(outcome.section.users.is_empty());
        assert!(store.calls.is_empty());
        let offset = PAGE.find("Metriky: hotovo").expect("marker") + "Metriky: hotovo".len();
        assert_eq!(outcome.section.insertion_offset, offset);
    }

    #[test]
    fn unknown_target_stops_before_fetching() {
        let config = config();
        let mut wiki = MockWiki::with_page(PAGE);
        let mut store = MockStore::default();
        let request = ReportRequest {
            target: "brno".to_string(),
            ..request(true)
        };

        let error = run_report(&config, &request, &mut wiki, &mut store).expect_err("must fail");
        assert!(matches!(
            error.downcast_ref::<ReportError>(),
            Some(ReportError::UnknownTarget { .. })
        ));
        assert!(wiki.fetched.is_empty());
    }

    #[test]
    fn store_failure_leaves_page_unsaved() {
        let config = config();
        let mut wiki = MockWiki::with_page(PAGE);
        let mut store = busy_store();
        store.fail_on = Some("cswikiquote".to_string());

        let error = run_report(&config, &request(false), &mut wiki, &mut store)
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("cswikiquote"));
        assert!(wiki.saved.is_empty());
    }

    #[test]
    fn section_without_times_is_a_locate_error() {
        let config = config();
        let mut wiki = MockWiki::with_page("== 2024-5-10 ==\nMetriky:\n");
        let mut store = MockStore::default();

        let error = run_report(&config, &request(true), &mut wiki, &mut store)
            .expect_err("must fail");
        assert_eq!(
            error.root_cause().to_string(),
            ReportError::MissingTimes { found: 0 }.to_string()
        );
    }
}
