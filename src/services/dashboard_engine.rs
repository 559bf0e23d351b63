use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use crate::error::CaptureError;
use crate::models::{
    hostname_of, ActivityRecord, AnalysisRow, DashboardTables, RareRow, RiskRow, SensitiveRow, Settings, SiteRow,
};

use super::classifier::Classifier;

const TOP_ROWS: usize = 10;
const RARE_MAX_COUNT: usize = 2;
const UNKNOWN_ACTION: &str = "UNKNOWN";

/// Counts in first-seen order, so ties keep the order records arrived in.
struct Tally<K> {
    index: HashMap<K, usize>,
    groups: Vec<(K, usize, f64)>,
}

impl<K: Eq + Hash + Clone> Tally<K> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            groups: Vec::new(),
        }
    }

    fn add(&mut self, key: K, risk: f64) {
        match self.index.get(&key) {
            Some(&i) => {
                self.groups[i].1 += 1;
                self.groups[i].2 += risk;
            }
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, 1, risk));
            }
        }
    }

    /// (key, count, summed risk) per group.
    fn into_groups(self) -> Vec<(K, usize, f64)> {
        self.groups
    }
}

fn action_label(record: &ActivityRecord) -> String {
    record
        .action_type
        .map(|t| t.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ACTION.to_string())
}

fn risk_of(record: &ActivityRecord) -> f64 {
    record.risk_score.unwrap_or(0.0)
}

/// Actions per (host, action type), busiest first, at most ten rows.
pub fn site_table(activities: &[ActivityRecord]) -> Vec<SiteRow> {
    let mut tally = Tally::new();
    for record in activities {
        let Some(host) = record.hostname() else { continue };
        tally.add((host, action_label(record)), 0.0);
    }

    let mut rows: Vec<SiteRow> = tally
        .into_groups()
        .into_iter()
        .map(|((host, action_type), count, _)| SiteRow {
            host,
            action_type,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows.truncate(TOP_ROWS);
    rows
}

/// Average risk per host, riskiest first, at most ten rows.
pub fn risk_table(activities: &[ActivityRecord]) -> Vec<RiskRow> {
    let mut tally = Tally::new();
    for record in activities {
        let Some(host) = record.hostname() else { continue };
        tally.add(host, risk_of(record));
    }

    let mut rows: Vec<RiskRow> = tally
        .into_groups()
        .into_iter()
        .map(|(host, count, total)| RiskRow {
            host,
            average_risk: total / count as f64,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.average_risk.total_cmp(&a.average_risk));
    rows.truncate(TOP_ROWS);
    rows
}

/// Settings changes and sensitive sends per (action, host). Unparsable URLs
/// are shown raw instead of being dropped.
pub fn sensitive_table(activities: &[ActivityRecord]) -> Vec<SensitiveRow> {
    let mut tally = Tally::new();
    for record in activities {
        if !record.action_type.is_some_and(|t| t.is_sensitive()) {
            continue;
        }
        let host = hostname_of(&record.url).unwrap_or_else(|| record.url.clone());
        tally.add((record.action_name.clone(), host), 0.0);
    }

    let mut rows: Vec<SensitiveRow> = tally
        .into_groups()
        .into_iter()
        .map(|((action_name, host), count, _)| SensitiveRow {
            action_name,
            host,
            count,
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count));
    rows
}

/// Action types seen at most twice, rarest first.
pub fn rare_table(activities: &[ActivityRecord]) -> Vec<RareRow> {
    let mut tally = Tally::new();
    for record in activities {
        tally.add(action_label(record), risk_of(record));
    }

    let mut rows: Vec<RareRow> = tally
        .into_groups()
        .into_iter()
        .filter(|(_, count, _)| *count <= RARE_MAX_COUNT)
        .map(|(action_type, count, total)| RareRow {
            action_type,
            count,
            average_risk: total / count as f64,
        })
        .collect();
    rows.sort_by(|a, b| a.count.cmp(&b.count));
    rows
}

/// Distinct hostnames, for choosing a site to analyse.
pub fn site_options(activities: &[ActivityRecord]) -> Vec<String> {
    activities
        .iter()
        .filter_map(|r| r.hostname())
        .filter(|h| !h.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn render(activities: &[ActivityRecord]) -> DashboardTables {
    DashboardTables {
        sites: site_table(activities),
        risk: risk_table(activities),
        sensitive: sensitive_table(activities),
        rare: rare_table(activities),
        site_options: site_options(activities),
    }
}

/// On-demand analysis of one site. Without a token, or with nothing recorded
/// for the site, no request is made and no rows come back.
pub async fn analyze_site(
    classifier: &dyn Classifier,
    settings: &Settings,
    activities: &[ActivityRecord],
    site: &str,
) -> Result<Vec<AnalysisRow>, CaptureError> {
    if !settings.has_api_token() {
        log::debug!("analysis of {} skipped: no API token", site);
        return Ok(Vec::new());
    }

    let on_site: Vec<ActivityRecord> = activities
        .iter()
        .filter(|r| r.hostname().as_deref() == Some(site))
        .cloned()
        .collect();
    if on_site.is_empty() {
        log::debug!("analysis of {} skipped: no recorded activity", site);
        return Ok(Vec::new());
    }

    classifier.analyze(settings, site, &on_site).await
}

/// Plain-text rendering for the CLI.
pub fn render_text(tables: &DashboardTables) -> String {
    let mut out = String::new();

    out.push_str(&render_table(
        "Actions per site",
        &["Site", "Action type", "Count"],
        tables
            .sites
            .iter()
            .map(|r| vec![r.host.clone(), r.action_type.clone(), r.count.to_string()])
            .collect(),
    ));
    out.push_str(&render_table(
        "Average risk per site",
        &["Site", "Avg risk", "Count"],
        tables
            .risk
            .iter()
            .map(|r| vec![r.host.clone(), format!("{:.2}", r.average_risk), r.count.to_string()])
            .collect(),
    ));
    out.push_str(&render_table(
        "Sensitive actions",
        &["Action", "Site", "Count"],
        tables
            .sensitive
            .iter()
            .map(|r| vec![r.action_name.clone(), r.host.clone(), r.count.to_string()])
            .collect(),
    ));
    out.push_str(&render_table(
        "Rare actions",
        &["Action type", "Count", "Avg risk"],
        tables
            .rare
            .iter()
            .map(|r| vec![r.action_type.clone(), r.count.to_string(), format!("{:.2}", r.average_risk)])
            .collect(),
    ));

    out
}

pub fn render_table(title: &str, headers: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = format!("== {} ==\n", title);
    out.push_str(&line(headers.iter().map(|h| h.to_string()).collect()));
    out.push('\n');
    if rows.is_empty() {
        out.push_str("(none)\n");
    }
    for row in rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionType;
    use crate::services::test_support::FakeClassifier;

    fn rec(url: &str, action_type: Option<ActionType>) -> ActivityRecord {
        ActivityRecord {
            timestamp: 0,
            url: url.to_string(),
            app_name: String::new(),
            action_name: String::new(),
            misc_notes: String::new(),
            action_type,
            risk_score: None,
        }
    }

    fn named(url: &str, name: &str, action_type: ActionType, risk: Option<f64>) -> ActivityRecord {
        ActivityRecord {
            action_name: name.to_string(),
            risk_score: risk,
            ..rec(url, Some(action_type))
        }
    }

    #[test]
    fn site_table_groups_and_orders() {
        let activities = vec![
            rec("https://a.com", Some(ActionType::Read)),
            rec("https://a.com", Some(ActionType::Read)),
            rec("https://b.com", Some(ActionType::Read)),
        ];
        assert_eq!(
            site_table(&activities),
            vec![
                SiteRow { host: "a.com".into(), action_type: "READ".into(), count: 2 },
                SiteRow { host: "b.com".into(), action_type: "READ".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn site_table_skips_bad_urls_and_caps_rows() {
        let mut activities = vec![rec("", Some(ActionType::Read)), rec("::nope::", Some(ActionType::Read))];
        for i in 0..15 {
            for _ in 0..=i {
                activities.push(rec(&format!("https://site{}.com/page", i), Some(ActionType::Browse)));
            }
        }

        let rows = site_table(&activities);
        assert_eq!(rows.len(), 10);
        assert!(rows.windows(2).all(|w| w[0].count >= w[1].count));
        assert_eq!(rows[0].host, "site14.com");
        assert_eq!(rows[0].count, 15);
    }

    #[test]
    fn sensitive_table_keeps_only_sensitive_actions() {
        let activities = vec![
            named("https://ex.com", "change password", ActionType::SettingsChange, None),
            named("https://ex.com", "view", ActionType::Read, None),
            named("https://mail.ex.com", "send invoice", ActionType::EmailSensitiveSend, None),
            named("https://mail.ex.com", "send invoice", ActionType::EmailSensitiveSend, None),
            named("garbage", "toggle 2fa", ActionType::SettingsChange, None),
        ];
        assert_eq!(
            sensitive_table(&activities),
            vec![
                SensitiveRow { action_name: "send invoice".into(), host: "mail.ex.com".into(), count: 2 },
                SensitiveRow { action_name: "change password".into(), host: "ex.com".into(), count: 1 },
                SensitiveRow { action_name: "toggle 2fa".into(), host: "garbage".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn rare_table_lists_low_prevalence_types() {
        let activities = vec![
            rec("https://a.com", Some(ActionType::Read)),
            rec("https://a.com", Some(ActionType::Read)),
            rec("https://a.com", Some(ActionType::Read)),
            rec("https://a.com", Some(ActionType::Browse)),
            rec("https://a.com", Some(ActionType::Browse)),
            named("https://a.com", "x", ActionType::SettingsChange, Some(8.0)),
            rec("https://a.com", None),
        ];
        let rows = rare_table(&activities);
        let types: Vec<&str> = rows.iter().map(|r| r.action_type.as_str()).collect();
        assert_eq!(rows.len(), 3);
        assert!(!types.contains(&"READ"));
        assert_eq!(rows.last().map(|r| (r.action_type.as_str(), r.count)), Some(("BROWSE", 2)));
        assert!(rows.windows(2).all(|w| w[0].count <= w[1].count));

        let settings_row = rows.iter().find(|r| r.action_type == "SETTINGS-CHANGE").unwrap();
        assert_eq!(settings_row.average_risk, 8.0);
        assert!(types.contains(&UNKNOWN_ACTION));
    }

    #[test]
    fn risk_table_averages_with_missing_scores_as_zero() {
        let activities = vec![
            named("https://a.com", "x", ActionType::Read, Some(4.0)),
            named("https://a.com", "y", ActionType::Read, None),
            named("https://b.com", "z", ActionType::SettingsChange, Some(9.0)),
            named("not a url", "w", ActionType::SettingsChange, Some(10.0)),
        ];
        assert_eq!(
            risk_table(&activities),
            vec![
                RiskRow { host: "b.com".into(), average_risk: 9.0, count: 1 },
                RiskRow { host: "a.com".into(), average_risk: 2.0, count: 2 },
            ]
        );
    }

    #[test]
    fn site_options_are_sorted_and_distinct() {
        let activities = vec![
            rec("https://b.com/x", None),
            rec("https://a.com", None),
            rec("https://b.com/y", None),
            rec("about:blank", None),
        ];
        assert_eq!(site_options(&activities), vec!["a.com".to_string(), "b.com".to_string()]);
    }

    #[test]
    fn empty_store_renders_placeholders() {
        let text = render_text(&render(&[]));
        assert!(text.contains("== Actions per site =="));
        assert_eq!(text.matches("(none)").count(), 4);
    }

    #[tokio::test]
    async fn analysis_filters_to_the_site() {
        let rows = vec![AnalysisRow { action: "a".into(), reason: "r".into() }];
        let classifier = FakeClassifier::analysing(rows.clone());
        let settings = Settings { api_token: "sk".into(), ..Settings::default() };
        let activities = vec![rec("https://a.com/1", None), rec("https://b.com", None), rec("https://a.com/2", None)];

        let result = analyze_site(&classifier, &settings, &activities, "a.com").await.unwrap();
        assert_eq!(result, rows);
        assert_eq!(classifier.last_records().len(), 2);
    }

    #[tokio::test]
    async fn analysis_is_a_no_op_without_token_or_records() {
        let classifier = FakeClassifier::analysing(vec![AnalysisRow { action: "a".into(), reason: "r".into() }]);
        let activities = vec![rec("https://a.com", None)];

        let no_token = analyze_site(&classifier, &Settings::default(), &activities, "a.com").await.unwrap();
        assert!(no_token.is_empty());

        let settings = Settings { api_token: "sk".into(), ..Settings::default() };
        let no_records = analyze_site(&classifier, &settings, &activities, "c.com").await.unwrap();
        assert!(no_records.is_empty());

        assert_eq!(classifier.analysis_calls(), 0);
    }
}
