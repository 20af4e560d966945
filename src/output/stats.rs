//! Statistics for finished scans
//!
//! This module extracts scan results from the storage layer and prints them
//! for the command line.

use crate::crawler::ScanReport;
use crate::fingerprint::TechSignal;
use crate::state::PageOutcome;
use crate::storage::{ScanJob, ScanStore};
use crate::ScanError;
use std::collections::{BTreeMap, HashMap};

/// Stored results of one scan
#[derive(Debug, Clone)]
pub struct ScanStatistics {
    pub job: ScanJob,

    /// Total number of discovered URLs
    pub total_urls: u64,

    /// Count of URLs by outcome
    pub urls_by_outcome: HashMap<PageOutcome, u64>,

    /// Count of URLs by discovery depth
    pub urls_by_depth: BTreeMap<u32, u64>,

    /// Number of distinct forms
    pub forms: u64,

    /// Forms per HTTP method
    pub forms_by_method: BTreeMap<String, u64>,

    /// Detected technologies
    pub technologies: Vec<TechSignal>,

    /// Most frequent error messages, most frequent first
    pub top_errors: Vec<(String, u64)>,
}

impl ScanStatistics {
    /// URLs whose outcome counts as an error
    pub fn error_count(&self) -> u64 {
        self.urls_by_outcome
            .iter()
            .filter(|(outcome, _)| outcome.is_error())
            .map(|(_, count)| count)
            .sum()
    }
}

/// Loads statistics for a scan from storage
///
/// # Arguments
///
/// * `store` - The storage backend to query
/// * `scan_id` - The scan to summarize
///
/// # Returns
///
/// * `Ok(ScanStatistics)` - Successfully loaded statistics
/// * `Err(ScanError)` - Unknown scan or failed query
pub fn load_statistics(store: &dyn ScanStore, scan_id: i64) -> Result<ScanStatistics, ScanError> {
    let job = store.get_job(scan_id)?;
    let total_urls = store.count_discovered_urls(scan_id)?;
    let urls_by_outcome = store.count_by_outcome(scan_id)?;

    let mut urls_by_depth = BTreeMap::new();
    let mut errors: HashMap<String, u64> = HashMap::new();
    for url in store.list_discovered_urls(scan_id)? {
        *urls_by_depth.entry(url.depth).or_insert(0) += 1;
        if let Some(error) = url.error {
            *errors.entry(error).or_insert(0) += 1;
        }
    }

    let mut top_errors: Vec<(String, u64)> = errors.into_iter().collect();
    top_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_errors.truncate(10);

    let forms = store.list_forms(scan_id)?;
    let mut forms_by_method = BTreeMap::new();
    for form in &forms {
        *forms_by_method.entry(form.form.method.clone()).or_insert(0) += 1;
    }

    let technologies = store
        .list_fingerprints(scan_id)?
        .into_iter()
        .map(|f| f.signal)
        .collect();

    Ok(ScanStatistics {
        job,
        total_urls,
        urls_by_outcome,
        urls_by_depth,
        forms: forms.len() as u64,
        forms_by_method,
        technologies,
        top_errors,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &ScanStatistics) {
    println!("=== Scan {} Statistics ===\n", stats.job.id);

    println!("Overview:");
    println!("  Target: {}", stats.job.target);
    println!("  Status: {}", stats.job.status);
    println!("  Created: {}", stats.job.created_at.to_rfc3339());
    println!("  Updated: {}", stats.job.updated_at.to_rfc3339());
    println!("  URLs discovered: {}", stats.total_urls);
    println!("  Forms: {}", stats.forms);
    println!("  Technologies: {}", stats.technologies.len());
    println!();

    println!("URLs by Outcome:");
    let mut outcome_counts: Vec<_> = stats.urls_by_outcome.iter().collect();
    outcome_counts.sort_by(|a, b| b.1.cmp(a.1));
    for (outcome, count) in outcome_counts {
        let percentage = if stats.total_urls > 0 {
            (*count as f64 / stats.total_urls as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", outcome, count, percentage);
    }
    println!();

    println!("URLs by Depth:");
    for (depth, count) in &stats.urls_by_depth {
        println!("  {}: {}", depth, count);
    }
    println!();

    if !stats.forms_by_method.is_empty() {
        println!("Forms by Method:");
        for (method, count) in &stats.forms_by_method {
            println!("  {}: {}", method, count);
        }
        println!();
    }

    if !stats.technologies.is_empty() {
        println!("Technologies:");
        for tech in &stats.technologies {
            println!("  - {}", tech);
        }
        println!();
    }

    if !stats.top_errors.is_empty() {
        println!("Top Errors:");
        for (error, count) in &stats.top_errors {
            println!("  {}x {}", count, error);
        }
        println!();
    }

    println!(
        "Error Rate: {} of {} URLs",
        stats.error_count(),
        stats.total_urls
    );
}

/// Prints the summary of a scan that just ran
pub fn print_report(report: &ScanReport) {
    println!("=== Scan {} {} ===", report.scan_id, report.status);
    println!("  Pages fetched: {}", report.pages_fetched);
    println!("  Pages failed: {}", report.pages_failed);
    println!("  Pages skipped: {}", report.pages_skipped);
    println!("  Forms: {}", report.forms);
    println!("  Technologies: {}", report.fingerprints);
    println!("  Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    if let Some(reason) = &report.failure {
        println!("  Failure: {}", reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::{FormDescriptor, FormField};
    use crate::storage::{DiscoveredUrl, ExtractedForm, SqliteStore, TechnologyFingerprint};
    use url::Url;

    #[test]
    fn test_load_statistics() {
        let store = SqliteStore::open_in_memory().unwrap();
        let job = store
            .create_job(&Url::parse("https://example.com/").unwrap())
            .unwrap();

        let rows = [
            ("https://example.com/", 0, PageOutcome::Ok, None),
            ("https://example.com/a", 1, PageOutcome::Ok, None),
            (
                "https://example.com/slow",
                1,
                PageOutcome::Timeout,
                Some("timeout: no complete response"),
            ),
        ];
        for (url, depth, outcome, error) in rows {
            store
                .save_discovered_url(&DiscoveredUrl {
                    scan_id: job.id,
                    url: url.to_string(),
                    status_code: None,
                    depth,
                    outcome,
                    error: error.map(str::to_string),
                })
                .unwrap();
        }

        store
            .save_extracted_form(&ExtractedForm {
                scan_id: job.id,
                page_url: "https://example.com/".to_string(),
                form: FormDescriptor {
                    action: "https://example.com/search".to_string(),
                    method: "GET".to_string(),
                    fields: vec![FormField {
                        name: "q".to_string(),
                        field_type: "text".to_string(),
                    }],
                },
            })
            .unwrap();

        store
            .save_fingerprint(&TechnologyFingerprint {
                scan_id: job.id,
                source_url: "https://example.com/".to_string(),
                signal: TechSignal::new("nginx", Some("1.25".to_string())),
            })
            .unwrap();

        let stats = load_statistics(&store, job.id).unwrap();

        assert_eq!(stats.total_urls, 3);
        assert_eq!(stats.urls_by_depth.get(&1), Some(&2));
        assert_eq!(stats.urls_by_outcome.get(&PageOutcome::Ok), Some(&2));
        assert_eq!(stats.error_count(), 1);
        assert_eq!(stats.forms, 1);
        assert_eq!(stats.forms_by_method.get("GET"), Some(&1));
        assert_eq!(stats.technologies[0].name, "nginx");
        assert_eq!(stats.top_errors.len(), 1);
    }

    #[test]
    fn test_unknown_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(load_statistics(&store, 99).is_err());
    }
}
