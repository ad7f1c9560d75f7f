//! Per-target compatibility report and the results summary table.

use crate::result::{Category, SyncResult, TargetResults};
use harnessync_state::SyncStatus;
use serde::Serialize;
use std::collections::BTreeMap;

/// Results of one run keyed by target name.
pub type RunResults = BTreeMap<String, TargetResults>;

const RULE: &str = "============================================================";
const THIN_RULE: &str = "------------------------------------------------------------";

/// Why items of a category needed translation for the target.
pub fn adaptation_reason(category: Category) -> &'static str {
    match category {
        Category::Rules => "Rules content concatenated/inlined to target format",
        Category::Skills => "Skills synced via symlinks",
        Category::Agents => "Agent .md files converted to target skill/agent format",
        Category::Commands => "Command .md files converted to target format",
        Category::Mcp => "MCP server config translated from JSON to target format",
        Category::Settings => "Settings mapped with conservative permission defaults",
        Category::Error => "Adapter-level result",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryItems {
    pub category: Category,
    pub count: usize,
    /// File names for synced/skipped, messages for failed.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdaptedItems {
    pub category: Category,
    pub count: usize,
    pub explanation: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilitySummary {
    pub synced: usize,
    pub adapted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl CompatibilitySummary {
    /// Adapted items count as delivered.
    pub fn status(&self) -> SyncStatus {
        if self.failed > 0 {
            if self.synced > 0 || self.adapted > 0 {
                SyncStatus::Partial
            } else {
                SyncStatus::Failed
            }
        } else if self.synced + self.adapted + self.skipped == 0 {
            SyncStatus::Nothing
        } else {
            SyncStatus::Success
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetCompatibility {
    pub synced: Vec<CategoryItems>,
    pub adapted: Vec<AdaptedItems>,
    pub skipped: Vec<CategoryItems>,
    pub failed: Vec<CategoryItems>,
    pub summary: CompatibilitySummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub targets: BTreeMap<String, TargetCompatibility>,
}

impl CompatibilityReport {
    pub fn generate(results: &RunResults) -> Self {
        let targets = results
            .iter()
            .map(|(target, by_category)| (target.clone(), analyze(by_category)))
            .collect();
        Self { targets }
    }

    /// True when any target adapted or failed items.
    pub fn has_issues(&self) -> bool {
        self.targets
            .values()
            .any(|t| t.summary.adapted > 0 || t.summary.failed > 0)
    }

    pub fn format(&self) -> String {
        if self.targets.is_empty() {
            return String::new();
        }
        let mut lines = vec![format!("\n{RULE}"), "Sync Compatibility Report".into(), RULE.into()];
        let mut overall = CompatibilitySummary::default();

        for (target, report) in &self.targets {
            lines.push(format!("\n{}", target.to_uppercase()));
            lines.push(THIN_RULE.into());
            for item in &report.synced {
                lines.push(format!("  ✓ {}: {} synced (direct map)", item.category, item.count));
            }
            for item in &report.adapted {
                lines.push(format!("  → {}: {} adapted", item.category, item.count));
                lines.push(format!("     ({})", item.explanation));
            }
            for item in &report.skipped {
                lines.push(format!("  - {}: {} skipped", item.category, item.count));
            }
            for item in &report.failed {
                lines.push(format!("  ✗ {}: {} failed", item.category, item.count));
                for reason in item.files.iter().take(3) {
                    lines.push(format!("     Reason: {reason}"));
                }
            }
            let s = report.summary;
            lines.push(format!(
                "\n  Summary: {} synced | {} adapted | {} skipped | {} failed",
                s.synced, s.adapted, s.skipped, s.failed
            ));
            lines.push(format!("  Status: {}", s.status()));

            overall.synced += s.synced;
            overall.adapted += s.adapted;
            overall.skipped += s.skipped;
            overall.failed += s.failed;
        }

        lines.push(format!("\n{RULE}"));
        lines.push(format!(
            "Overall: {} synced | {} adapted | {} skipped | {} failed",
            overall.synced, overall.adapted, overall.skipped, overall.failed
        ));
        lines.push(format!("{RULE}\n"));
        lines.join("\n")
    }
}

fn analyze(results: &TargetResults) -> TargetCompatibility {
    let mut report = TargetCompatibility::default();
    for (category, r) in results {
        let category = *category;
        if r.synced > 0 {
            report.synced.push(CategoryItems {
                category,
                count: r.synced,
                files: r.synced_files.clone(),
            });
            report.summary.synced += r.synced;
        }
        if r.adapted > 0 {
            report.adapted.push(AdaptedItems {
                category,
                count: r.adapted,
                explanation: adaptation_reason(category),
            });
            report.summary.adapted += r.adapted;
        }
        if r.skipped > 0 {
            report.skipped.push(CategoryItems {
                category,
                count: r.skipped,
                files: r.skipped_files.clone(),
            });
            report.summary.skipped += r.skipped;
        }
        if r.failed > 0 {
            report.failed.push(CategoryItems {
                category,
                count: r.failed,
                files: r.failed_files.clone(),
            });
            report.summary.failed += r.failed;
        }
    }
    report
}

/// Fixed-width summary table, one row per target plus totals.
pub fn format_results_table(results: &RunResults, account: Option<&str>) -> String {
    let separator = format!(
        "{}+{}+{}+{}+{}",
        "-".repeat(12),
        "-".repeat(8),
        "-".repeat(9),
        "-".repeat(8),
        "-".repeat(8)
    );
    let mut lines = vec![
        match account {
            Some(account) => format!("HarnessSync Results ({account})"),
            None => "HarnessSync Results".to_string(),
        },
        RULE.to_string(),
        format!(
            "{:<12}| {:>6} | {:>7} | {:>6} | {:<8}",
            "Target", "Synced", "Skipped", "Failed", "Status"
        ),
        separator.clone(),
    ];

    let mut total = SyncResult::default();
    for (target, by_category) in results {
        let sum = crate::result::combine(by_category);
        lines.push(format!(
            "{target:<12}| {:>6} | {:>7} | {:>6} | {:<8}",
            sum.synced,
            sum.skipped,
            sum.failed,
            sum.status().as_str()
        ));
        total = total.merge(sum);
    }

    lines.push(separator);
    lines.push(format!(
        "{:<12}| {:>6} | {:>7} | {:>6} |",
        "Total", total.synced, total.skipped, total.failed
    ));
    lines.join("\n")
}
